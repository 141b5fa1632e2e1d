mod common;

use common::FakeProjector;
use roomctl::{InputSource, PowerState, ProjectorLink, RoomError, RETRY_BACKOFF};
use std::time::Instant;

#[tokio::test]
async fn power_on_without_auth() {
    let fake = FakeProjector::start(Some("PJLINK 0"), "%1POWR=OK").await;
    let link = ProjectorLink::new(&fake.config());

    assert!(link.power(true).await.unwrap());
    assert_eq!(fake.commands(), vec!["%1POWR 1"]);
}

#[tokio::test]
async fn digest_is_prefixed_when_auth_is_required() {
    let fake = FakeProjector::start(Some("PROTO 1 ABCDEF01"), "%1POWR=OK").await;
    let mut config = fake.config();
    config.password = Some("secret".to_string());
    let link = ProjectorLink::new(&config);

    assert!(link.power(true).await.unwrap());
    assert_eq!(
        fake.commands(),
        vec!["87c6646a69637f16c2127a77fea7b6c8%1POWR 1"]
    );
}

#[tokio::test]
async fn auth_without_password_is_a_config_error() {
    let fake = FakeProjector::start(Some("PJLINK 1 12345678"), "%1POWR=OK").await;
    let link = ProjectorLink::new(&fake.config());

    let err = link.power(false).await.unwrap_err();
    assert!(matches!(err, RoomError::Config(_)));
    assert!(fake.commands().is_empty());
}

#[tokio::test]
async fn every_command_uses_a_fresh_connection() {
    let fake = FakeProjector::start(Some("PJLINK 0"), "%1POWR=2").await;
    let link = ProjectorLink::new(&fake.config());

    assert_eq!(link.power_state().await.unwrap(), PowerState::Cooling);
    assert_eq!(link.power_state().await.unwrap(), PowerState::Cooling);
    assert_eq!(fake.connections(), 2);
    assert_eq!(fake.commands(), vec!["%1POWR ?", "%1POWR ?"]);
}

#[tokio::test]
async fn input_uses_the_mapped_code() {
    let fake = FakeProjector::start(Some("PJLINK 0"), "%1INPT=OK").await;
    let link = ProjectorLink::new(&fake.config());

    assert!(link.set_input(InputSource::Hdmi1).await.unwrap());
    assert!(link.set_input(InputSource::HdBaseT).await.unwrap());
    assert_eq!(fake.commands(), vec!["%1INPT 32", "%1INPT 56"]);
}

#[tokio::test]
async fn error_reply_is_not_ok() {
    let fake = FakeProjector::start(Some("PJLINK 0"), "%1INPT=ERR2").await;
    let link = ProjectorLink::new(&fake.config());

    assert!(!link.set_input(InputSource::Computer1).await.unwrap());
}

#[tokio::test]
async fn silent_projector_fails_after_all_retries() {
    let fake = FakeProjector::start(None, "").await;
    let mut config = fake.config();
    config.retries = 2;
    config.timeout_s = 0.2;
    let link = ProjectorLink::new(&config);
    let started = Instant::now();

    let err = link.power(true).await.unwrap_err();

    assert!(err.is_timeout(), "unexpected error: {}", err);
    assert_eq!(fake.connections(), 3);
    // backoff after the first and second attempt
    assert!(started.elapsed() >= RETRY_BACKOFF * 3);
}

#[tokio::test]
async fn refused_connection_is_a_connect_error() {
    let fake = FakeProjector::start(Some("PJLINK 0"), "%1POWR=OK").await;
    let mut config = fake.config();
    // bind and drop to get a port nobody listens on
    let unused = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    config.port = unused.local_addr().unwrap().port();
    drop(unused);
    let link = ProjectorLink::new(&config);

    let err = link.power(true).await.unwrap_err();
    assert!(matches!(err, RoomError::Connect { .. }));
    assert_eq!(fake.connections(), 0);
}
