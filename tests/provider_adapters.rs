use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{Duration as Days, NaiveDate, Utc};

use qsosync::{
    core::{
        credentials::Credentials,
        persona::{CallsignRange, Persona},
    },
    providers::{
        ProviderRegistry, RemoteAction, RemoteRequest, RemoteResponse, Transport, TransportError,
        adif::AdifFields,
    },
    qso::QsoRecord,
    spi::{AuthStatus, FetchOptions, ProviderError, PushOutcome},
    state::Cursor,
    types::{Band, ConfirmationStatus, ProviderId},
};

#[derive(Default)]
struct FakeTransport {
    responses: Mutex<VecDeque<Result<RemoteResponse, TransportError>>>,
    requests: Mutex<Vec<RemoteRequest>>,
}

impl FakeTransport {
    fn respond(&self, resp: Result<RemoteResponse, TransportError>) {
        self.responses.lock().unwrap().push_back(resp);
    }

    fn last_request(&self) -> RemoteRequest {
        let requests = self.requests.lock().unwrap();
        requests.last().cloned().expect("a request was sent")
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(RemoteResponse::ok(Vec::new())))
    }
}

fn row(pairs: &[(&str, &str)]) -> AdifFields {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn registry(transport: &Arc<FakeTransport>) -> ProviderRegistry {
    ProviderRegistry::from_config(&ProviderId::ALL, transport.clone())
}

fn user_pass(provider: ProviderId) -> Credentials {
    Credentials::new(provider, [("username", "ki7mt"), ("password", "hunter2")])
}

#[tokio::test]
async fn eqsl_rows_default_to_confirmed_and_cursor_tracks_qslrdate() {
    let transport = Arc::new(FakeTransport::default());
    let adapter = registry(&transport).get(ProviderId::Eqsl).expect("eqsl adapter");

    let session = adapter.authenticate(&user_pass(ProviderId::Eqsl)).await.expect("login");
    assert_eq!(transport.last_request().action, RemoteAction::Login);
    assert_eq!(session.callsign.as_deref(), Some("ki7mt"));

    transport.respond(Ok(RemoteResponse::ok(vec![
        row(&[
            ("CALL", "k1abc"),
            ("QSO_DATE", "20240301"),
            ("TIME_ON", "1234"),
            ("BAND", "20M"),
            ("MODE", "FT8"),
            ("QSLRDATE", "20240305"),
        ]),
        row(&[
            ("CALL", "w1aw"),
            ("QSO_DATE", "20240302"),
            ("TIME_ON", "0101"),
            ("FREQ", "7.074"),
            ("MODE", "FT8"),
            ("QSL_RCVD", "N"),
            ("QSLRDATE", "20240307"),
        ]),
        row(&[("CALL", "BROKEN"), ("MODE", "CW")]),
    ])));

    let since = Cursor::At("20240301".to_string());
    let page = adapter
        .fetch_confirmations(&session, &since, &FetchOptions::default())
        .await
        .expect("fetch");

    let req = transport.last_request();
    assert_eq!(req.action, RemoteAction::Download);
    assert_eq!(req.params.get("RcvdSince").map(String::as_str), Some("20240301"));

    assert_eq!(page.records.len(), 2);
    assert_eq!(page.records[0].status, ConfirmationStatus::Confirmed);
    assert_eq!(page.records[0].key.operator, "KI7MT");
    assert_eq!(page.records[1].status, ConfirmationStatus::Unconfirmed);
    assert_eq!(page.records[1].key.band, Band::B40m);
    assert_eq!(page.next_cursor, Cursor::At("20240307".to_string()));
    assert!(!page.has_more);
}

#[tokio::test]
async fn clublog_cursor_is_numeric_match_id() {
    let transport = Arc::new(FakeTransport::default());
    let adapter = registry(&transport).get(ProviderId::Clublog).expect("clublog adapter");
    let creds = Credentials::new(
        ProviderId::Clublog,
        [
            ("email", "op@example.org"),
            ("password", "pw"),
            ("api_key", "k"),
            ("callsign", "KI7MT"),
        ],
    );
    let session = adapter.authenticate(&creds).await.expect("login");
    assert_eq!(session.api_key.as_deref(), Some("k"));
    let limits = adapter.rate_limit_info().expect("clublog publishes limits");
    assert_eq!(limits.min_interval(), Some(Duration::from_secs(1)));

    let mut resp = RemoteResponse::ok(vec![
        row(&[
            ("CALL", "DL1ABC"),
            ("QSO_DATE", "20240301"),
            ("TIME_ON", "1200"),
            ("BAND", "20m"),
            ("MODE", "SSB"),
            ("APP_CLUBLOG_MATCHID", "9"),
            ("APP_CLUBLOG_STATUS", "confirmed"),
        ]),
        row(&[
            ("CALL", "JA1XYZ"),
            ("QSO_DATE", "20240301"),
            ("TIME_ON", "1300"),
            ("BAND", "15m"),
            ("MODE", "CW"),
            ("APP_CLUBLOG_MATCHID", "10"),
        ]),
    ]);
    resp.more = true;
    transport.respond(Ok(resp));

    let page = adapter
        .fetch_confirmations(&session, &Cursor::Beginning, &FetchOptions { page_size: 2 })
        .await
        .expect("fetch");
    assert_eq!(page.next_cursor, Cursor::At("10".to_string()));
    assert!(page.has_more);
    assert_eq!(page.records[0].status, ConfirmationStatus::Confirmed);
    assert_eq!(page.records[1].status, ConfirmationStatus::Unconfirmed);
    assert_eq!(
        page.records[0].meta.get("APP_CLUBLOG_MATCHID").map(String::as_str),
        Some("9")
    );
    let req = transport.last_request();
    assert_eq!(req.params.get("limit").map(String::as_str), Some("2"));
    assert_eq!(req.params.get("api").map(String::as_str), Some("k"));

    let local = vec![QsoRecord::new(page.records[1].key.clone(), None)];
    transport.respond(Ok(RemoteResponse::ok(vec![row(&[("RESULT", "ok")])])));
    adapter.push_records(&session, &local).await.expect("push");
    let req = transport.last_request();
    assert_eq!(req.action, RemoteAction::Upload);
    assert_eq!(req.params.get("api").map(String::as_str), Some("k"));
    assert_eq!(req.params.get("email").map(String::as_str), Some("op@example.org"));
}

#[tokio::test]
async fn missing_credential_fields_fail_as_auth() {
    let transport = Arc::new(FakeTransport::default());
    let reg = registry(&transport);

    let qrz = reg.get(ProviderId::Qrz).expect("qrz adapter");
    let err = qrz.authenticate(&user_pass(ProviderId::Qrz)).await.unwrap_err();
    assert!(matches!(err, ProviderError::Auth(_)));

    let lotw = reg.get(ProviderId::Lotw).expect("lotw adapter");
    let err = lotw
        .authenticate(&Credentials::new(ProviderId::Lotw, [("username", "ki7mt")]))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Auth(_)));
    assert!(transport.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn transport_failures_map_to_error_taxonomy() {
    let transport = Arc::new(FakeTransport::default());
    let lotw = registry(&transport).get(ProviderId::Lotw).expect("lotw adapter");
    let session = lotw.authenticate(&user_pass(ProviderId::Lotw)).await.expect("login");

    transport.respond(Err(TransportError::Timeout));
    let err = lotw
        .fetch_confirmations(&session, &Cursor::Beginning, &FetchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Transient(_)));

    let mut throttled = RemoteResponse::with_status(429, "too many requests");
    throttled.retry_after = Some(Duration::from_secs(60));
    transport.respond(Ok(throttled));
    let err = lotw
        .fetch_confirmations(&session, &Cursor::Beginning, &FetchOptions::default())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ProviderError::RateLimited {
            retry_after: Some(Duration::from_secs(60)),
            message: "too many requests".to_string(),
        }
    );

    transport.respond(Ok(RemoteResponse::with_status(403, "password incorrect")));
    let err = lotw
        .fetch_confirmations(&session, &Cursor::Beginning, &FetchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Auth(_)));
}

#[tokio::test]
async fn qrz_push_results_line_up_with_records() {
    let transport = Arc::new(FakeTransport::default());
    let qrz = registry(&transport).get(ProviderId::Qrz).expect("qrz adapter");
    let creds = Credentials::new(ProviderId::Qrz, [("api_key", "ABCD-1234")]);
    let session = qrz.authenticate(&creds).await.expect("login");
    let login = transport.last_request();
    assert_eq!(login.params.get("KEY").map(String::as_str), Some("ABCD-1234"));

    let page_rows = vec![row(&[
        ("STATION_CALLSIGN", "KI7MT"),
        ("CALL", "VK2ABC"),
        ("QSO_DATE", "20240301"),
        ("TIME_ON", "0800"),
        ("BAND", "20m"),
        ("MODE", "CW"),
        ("APP_QRZLOG_LOGID", "77"),
        ("APP_QRZLOG_STATUS", "C"),
    ])];
    transport.respond(Ok(RemoteResponse::ok(page_rows)));
    let page = qrz
        .fetch_confirmations(&session, &Cursor::At("70".to_string()), &FetchOptions::default())
        .await
        .expect("fetch");
    assert_eq!(page.records[0].status, ConfirmationStatus::Confirmed);
    assert_eq!(page.next_cursor, Cursor::At("77".to_string()));
    let req = transport.last_request();
    assert_eq!(req.params.get("AFTERLOGID").map(String::as_str), Some("70"));

    let local: Vec<QsoRecord> = page
        .records
        .iter()
        .map(|r| QsoRecord::new(r.key.clone(), r.freq_hz))
        .chain(page.records.iter().map(|r| {
            let mut key = r.key.clone();
            key.remote = "ZL1AAA".to_string();
            QsoRecord::new(key, None)
        }))
        .chain(page.records.iter().map(|r| {
            let mut key = r.key.clone();
            key.remote = "JA1XYZ".to_string();
            QsoRecord::new(key, None)
        }))
        .collect();
    transport.respond(Ok(RemoteResponse::ok(vec![
        row(&[("RESULT", "duplicate")]),
        row(&[("RESULT", "rejected: invalid band")]),
    ])));

    let results = qrz.push_records(&session, &local).await.expect("push");
    let req = transport.last_request();
    assert_eq!(req.action, RemoteAction::Upload);
    assert_eq!(req.rows.len(), 3);
    assert_eq!(req.rows[1].get("CALL").map(String::as_str), Some("ZL1AAA"));

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].1, PushOutcome::Duplicate);
    assert_eq!(results[1].1, PushOutcome::Rejected("invalid band".to_string()));
    assert!(matches!(results[2].1, PushOutcome::Rejected(_)));
}

#[test]
fn auth_check_inspects_credentials_without_network() {
    let transport = Arc::new(FakeTransport::default());
    let reg = registry(&transport);
    let lotw = reg.get(ProviderId::Lotw).expect("lotw adapter");

    assert_eq!(lotw.auth_check(&user_pass(ProviderId::Lotw)), AuthStatus::Ok);
    let partial = Credentials::new(ProviderId::Lotw, [("username", "ki7mt")]);
    assert_eq!(lotw.auth_check(&partial), AuthStatus::Invalid);
    assert_eq!(lotw.auth_check(&user_pass(ProviderId::Eqsl)), AuthStatus::Invalid);

    let past = (Utc::now() - Days::days(1)).to_rfc3339();
    let expired = Credentials::new(
        ProviderId::Lotw,
        [("username", "ki7mt"), ("password", "pw"), ("expires_at", past.as_str())],
    );
    assert_eq!(lotw.auth_check(&expired), AuthStatus::Expired);

    let future = (Utc::now() + Days::days(30)).to_rfc3339();
    let valid = Credentials::new(
        ProviderId::Lotw,
        [("username", "ki7mt"), ("password", "pw"), ("expires_at", future.as_str())],
    );
    assert_eq!(lotw.auth_check(&valid), AuthStatus::Ok);

    let garbled = Credentials::new(
        ProviderId::Lotw,
        [("username", "ki7mt"), ("password", "pw"), ("expires_at", "next tuesday")],
    );
    assert_eq!(lotw.auth_check(&garbled), AuthStatus::Error);

    let qrz = reg.get(ProviderId::Qrz).expect("qrz adapter");
    assert_eq!(qrz.auth_check(&user_pass(ProviderId::Qrz)), AuthStatus::Invalid);
    assert!(transport.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn ping_reports_reachability() {
    let transport = Arc::new(FakeTransport::default());
    let eqsl = registry(&transport).get(ProviderId::Eqsl).expect("eqsl adapter");

    let health = eqsl.ping().await;
    assert!(health.ok);
    assert_eq!(health.detail, "status 200");
    let req = transport.last_request();
    assert_eq!(req.action, RemoteAction::Ping);
    assert!(req.params.is_empty());

    transport.respond(Err(TransportError::Timeout));
    assert!(!eqsl.ping().await.ok);
}

#[tokio::test]
async fn persona_supplies_operator_by_qso_date() {
    let transport = Arc::new(FakeTransport::default());
    let eqsl = registry(&transport).get(ProviderId::Eqsl).expect("eqsl adapter");
    let mut session = eqsl.authenticate(&user_pass(ProviderId::Eqsl)).await.expect("login");
    session.persona = Some(Persona {
        id: "home".to_string(),
        label: String::new(),
        callsigns: vec![CallsignRange {
            call: "KD7ABC".to_string(),
            from: None,
            to: NaiveDate::from_ymd_opt(2020, 12, 31),
        }],
        providers: Default::default(),
    });

    transport.respond(Ok(RemoteResponse::ok(vec![
        row(&[
            ("CALL", "K1ABC"),
            ("QSO_DATE", "20190501"),
            ("TIME_ON", "1200"),
            ("BAND", "20m"),
            ("MODE", "CW"),
        ]),
        row(&[
            ("CALL", "W1AW"),
            ("QSO_DATE", "20240301"),
            ("TIME_ON", "1200"),
            ("BAND", "20m"),
            ("MODE", "CW"),
        ]),
        row(&[
            ("STATION_CALLSIGN", "N0CALL"),
            ("CALL", "DL1ABC"),
            ("QSO_DATE", "20190501"),
            ("TIME_ON", "1300"),
            ("BAND", "20m"),
            ("MODE", "CW"),
        ]),
    ])));
    let page = eqsl
        .fetch_confirmations(&session, &Cursor::Beginning, &FetchOptions::default())
        .await
        .expect("fetch");

    let operators: Vec<&str> = page.records.iter().map(|r| r.key.operator.as_str()).collect();
    assert_eq!(operators, ["KD7ABC", "KI7MT", "N0CALL"]);
}
