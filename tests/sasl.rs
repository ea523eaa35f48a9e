mod testsupport;

use std::sync::Arc;
use std::time::Duration;

use castle::prelude::{protocol, *};

use testsupport::{OneStepMechanism, Reply, ScriptedBroker};

fn scram_mechanisms() -> Vec<Arc<dyn Mechanism>> {
    vec![
        Arc::new(OneStepMechanism {
            mechanism: "SCRAM-SHA-512".to_string(),
        }),
        Arc::new(OneStepMechanism {
            mechanism: "SCRAM-SHA-256".to_string(),
        }),
    ]
}

fn handshake_mechanism(req: &testsupport::ReceivedRequest) -> String {
    String::from_utf8_lossy(&req.body[2..]).into_owned()
}

fn sasl_script(session_lifetime_ms: i64) -> impl Fn(&testsupport::ReceivedRequest) -> Reply {
    move |req| match req.api_key {
        18 => Reply::Body(testsupport::api_versions_v3_body(&[
            (0, 7),
            (3, 1),
            (17, 1),
            (36, 1),
        ])),
        17 => {
            // only SCRAM-SHA-256 is enabled on this fake broker
            if handshake_mechanism(req) == "SCRAM-SHA-256" {
                Reply::Body(testsupport::handshake_body(0, &["SCRAM-SHA-256"]))
            } else {
                Reply::Body(testsupport::handshake_body(33, &["SCRAM-SHA-256"]))
            }
        }
        36 => Reply::Body(testsupport::authenticate_v1_body(session_lifetime_ms)),
        3 => Reply::Body(testsupport::metadata_v1_body(1, "localhost", 9092)),
        _ => Reply::Nothing,
    }
}

#[tokio::test]
async fn unsupported_mechanism_switches_once_to_an_intersecting_one() -> Result<()> {
    let scripted = ScriptedBroker::start(sasl_script(0)).await;
    let ctx = ClientContext::new(ClientConfig {
        sasls: scram_mechanisms(),
        ..ClientConfig::default()
    });
    let broker = ctx.new_broker(
        unknown_seed_id(0),
        &scripted.addr.host,
        scripted.addr.port as i32,
        None,
    );

    broker
        .wait_response(None, Box::new(protocol::MetadataRequest::new(vec![])))
        .await?;

    // discovery, rejected handshake, retried handshake, auth, then the
    // actual request
    assert_eq!(scripted.request_keys(), vec![18, 17, 17, 36, 3]);
    let seen = scripted.requests();
    assert_eq!(handshake_mechanism(&seen[1]), "SCRAM-SHA-512");
    assert_eq!(handshake_mechanism(&seen[2]), "SCRAM-SHA-256");
    Ok(())
}

#[tokio::test]
async fn expired_session_reauthenticates_on_the_same_socket() -> Result<()> {
    let scripted = ScriptedBroker::start(sasl_script(6000)).await;
    let ctx = ClientContext::new(ClientConfig {
        sasls: scram_mechanisms(),
        ..ClientConfig::default()
    });
    let broker = ctx.new_broker(
        unknown_seed_id(0),
        &scripted.addr.host,
        scripted.addr.port as i32,
        None,
    );

    broker
        .wait_response(None, Box::new(protocol::MetadataRequest::new(vec![])))
        .await?;
    assert_eq!(scripted.request_keys(), vec![18, 17, 17, 36, 3]);

    // a 6000ms lifetime re-authenticates one second early, at ~5s
    tokio::time::sleep(Duration::from_millis(5300)).await;

    broker
        .wait_response(None, Box::new(protocol::MetadataRequest::new(vec![])))
        .await?;

    // the whole sasl flow ran again in place, without a new ApiVersions
    // and without a reconnect, before the second metadata request
    assert_eq!(
        scripted.request_keys(),
        vec![18, 17, 17, 36, 3, 17, 17, 36, 3]
    );

    // still the same connection: correlation ids never reset
    let seen = scripted.requests();
    let corr_ids: Vec<i32> = seen.iter().map(|r| r.correlation_id).collect();
    assert_eq!(corr_ids, (0..seen.len() as i32).collect::<Vec<_>>());
    Ok(())
}

#[tokio::test]
async fn session_lifetimes_under_five_seconds_are_rejected() {
    let scripted = ScriptedBroker::start(sasl_script(3000)).await;
    let ctx = ClientContext::new(ClientConfig {
        sasls: scram_mechanisms(),
        ..ClientConfig::default()
    });
    let broker = ctx.new_broker(
        unknown_seed_id(0),
        &scripted.addr.host,
        scripted.addr.port as i32,
        None,
    );

    let err = broker
        .wait_response(None, Box::new(protocol::MetadataRequest::new(vec![])))
        .await
        .unwrap_err();
    assert_eq!(err, Error::InvalidSaslLifetime(3000));
}
