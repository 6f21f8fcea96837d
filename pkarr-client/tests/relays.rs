//! Publishing and resolving against relays running over HTTP on localhost.
use std::time::Duration;

use http::StatusCode;
use n0_snafu::{Result, ResultExt};
use pkarr_base::{SecretKey, SignedRecord};
use pkarr_client::{
    Client, ClientError, MonotonicCounter, RelayError, RelayFailure, RelayUrl, ResolvePolicy,
    relay::PutBody,
    test_utils::{Behavior, TestRelay},
};
use rand::SeedableRng;
use serde_json::json;
use tracing_test::traced_test;

fn secret_key(seed: u64) -> SecretKey {
    let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
    SecretKey::generate(&mut rng)
}

fn error_of<'a>(failures: &'a [RelayFailure], relay: &TestRelay) -> &'a RelayError {
    &failures
        .iter()
        .find(|f| &f.relay == relay.url())
        .expect("relay is listed")
        .error
}

fn urls(relays: &[&TestRelay]) -> Vec<RelayUrl> {
    relays.iter().map(|r| r.url().clone()).collect()
}

#[tokio::test]
#[traced_test]
async fn publish_and_resolve() -> Result {
    let a = TestRelay::spawn().await.e()?;
    let b = TestRelay::spawn().await.e()?;
    let client = Client::builder().relays(urls(&[&a, &b])).build();
    let key = secret_key(0);
    let value = json!({ "addrs": ["192.0.2.7:4433"], "relay": "https://relay.example" });

    let put = client.put(&key, &value).await?;
    assert!(put.response.get("record").is_some());

    let got = client.get(&key.public()).await?;
    assert_eq!(got.value, value);
    assert_eq!(got.seq, put.record.seq());
    assert_eq!(got.record, put.record);
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn broken_relays_do_not_matter_while_one_works() -> Result {
    let failing = TestRelay::spawn_with(Behavior::Status(StatusCode::INTERNAL_SERVER_ERROR))
        .await
        .e()?;
    let garbage = TestRelay::spawn_with(Behavior::Garbage).await.e()?;
    let hanging = TestRelay::spawn_with(Behavior::Hang).await.e()?;
    let honest = TestRelay::spawn().await.e()?;
    let client = Client::builder()
        .relays(urls(&[&failing, &garbage, &hanging, &honest]))
        .build();
    let key = secret_key(1);

    let put = client.put(&key, &json!("hello")).await?;
    assert_eq!(&put.relay, honest.url());
    assert_eq!(honest.record(&key.public()), Some(put.record.clone()));

    let got = client.get(&key.public()).await?;
    assert_eq!(&got.relay, honest.url());
    assert_eq!(got.value, json!("hello"));
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn every_failure_is_reported() -> Result {
    let failing = TestRelay::spawn_with(Behavior::Status(StatusCode::BAD_GATEWAY))
        .await
        .e()?;
    let garbage = TestRelay::spawn_with(Behavior::Garbage).await.e()?;
    let empty = TestRelay::spawn().await.e()?;
    let client = Client::builder()
        .relays(urls(&[&failing, &garbage, &empty]))
        .build();
    let key = secret_key(2);

    let err = client.get(&key.public()).await.unwrap_err();
    assert!(matches!(err, ClientError::AllRelaysFailed { .. }));
    let failures = err.failures();
    assert_eq!(failures.len(), 3);
    assert!(matches!(
        error_of(failures, &failing),
        RelayError::HttpStatus {
            status: StatusCode::BAD_GATEWAY,
            ..
        }
    ));
    assert!(matches!(
        error_of(failures, &garbage),
        RelayError::MalformedResponse { .. }
    ));
    assert!(error_of(failures, &empty).is_not_found());
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn unreachable_relay_is_a_transport_failure() -> Result {
    let gone = TestRelay::spawn().await.e()?;
    let url = gone.url().clone();
    drop(gone);
    // give the server task a moment to release the port
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = Client::builder().relay(url).build();
    let err = client.get(&secret_key(3).public()).await.unwrap_err();
    assert_eq!(err.failures().len(), 1);
    assert!(matches!(
        err.failures()[0].error,
        RelayError::Transport { .. }
    ));
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn relays_only_accept_json_puts() -> Result {
    let relay = TestRelay::spawn().await.e()?;
    let key = secret_key(10);
    let client = Client::builder().relay(relay.url().clone()).build();
    let record = client.create_put_request(&key, &json!("typed"))?;
    let body = PutBody::from(&record).to_json()?;
    let url = relay.url().record_url(&key.public());

    let res = reqwest::Client::new()
        .put(url)
        .body(body)
        .send()
        .await
        .e()?;
    assert_eq!(res.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(relay.record(&key.public()), None);

    // the client labels its bodies, so the same record goes through
    client
        .publish_record(&key.public(), record.clone(), &[relay.url().clone()])
        .await?;
    assert_eq!(relay.record(&key.public()), Some(record));
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn not_found_on_all_relays() -> Result {
    let a = TestRelay::spawn().await.e()?;
    let b = TestRelay::spawn().await.e()?;
    let client = Client::builder().relays(urls(&[&a, &b])).build();

    let err = client.get(&secret_key(4).public()).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.failures().len(), 2);
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn tampered_records_are_rejected() -> Result {
    let key = secret_key(5);
    let record = SignedRecord::sign(&key, 3, serde_json::to_vec(&json!("genuine")).unwrap());

    let tamper = TestRelay::spawn_with(Behavior::Tamper).await.e()?;
    tamper.insert(key.public(), record.clone());
    let client = Client::builder().relay(tamper.url().clone()).build();
    let err = client.get(&key.public()).await.unwrap_err();
    assert!(matches!(
        err.failures()[0].error,
        RelayError::InvalidSignature { .. }
    ));

    // an honest relay answering later still wins
    let slow = TestRelay::spawn_with(Behavior::Delay(Duration::from_millis(100)))
        .await
        .e()?;
    slow.insert(key.public(), record.clone());
    let client = Client::builder()
        .relays(urls(&[&tamper, &slow]))
        .build();
    let got = client.get(&key.public()).await?;
    assert_eq!(&got.relay, slow.url());
    assert_eq!(got.record, record);
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn relays_reject_older_sequence_numbers() -> Result {
    let relay = TestRelay::spawn().await.e()?;
    let key = secret_key(6);
    let newer = Client::builder()
        .relay(relay.url().clone())
        .sequence_source(MonotonicCounter::starting_at(10))
        .build();
    let older = Client::builder()
        .relay(relay.url().clone())
        .sequence_source(MonotonicCounter::starting_at(5))
        .build();

    newer.put(&key, &json!("v10")).await?;
    let err = older.put(&key, &json!("v5")).await.unwrap_err();
    assert!(matches!(
        err.failures()[0].error,
        RelayError::HttpStatus {
            status: StatusCode::CONFLICT,
            ..
        }
    ));

    let got = older.get(&key.public()).await?;
    assert_eq!(got.seq, 10);
    assert_eq!(got.value, json!("v10"));
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn resolve_policies_pick_first_or_freshest() -> Result {
    let key = secret_key(7);
    let stale = SignedRecord::sign(&key, 1, serde_json::to_vec(&json!("stale")).unwrap());
    let fresh = SignedRecord::sign(&key, 2, serde_json::to_vec(&json!("fresh")).unwrap());

    let fast = TestRelay::spawn().await.e()?;
    fast.insert(key.public(), stale);
    let slow = TestRelay::spawn_with(Behavior::Delay(Duration::from_millis(200)))
        .await
        .e()?;
    slow.insert(key.public(), fresh);
    let relays = urls(&[&fast, &slow]);

    let first = Client::builder().relays(relays.clone()).build();
    let got = first.get(&key.public()).await?;
    assert_eq!(got.seq, 1);
    assert_eq!(got.value, json!("stale"));

    let freshest = Client::builder()
        .relays(relays)
        .resolve_policy(ResolvePolicy::HighestSeq {
            window: Duration::from_secs(5),
        })
        .build();
    let got = freshest.get(&key.public()).await?;
    assert_eq!(&got.relay, slow.url());
    assert_eq!(got.seq, 2);
    assert_eq!(got.value, json!("fresh"));
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn resolve_raw_record() -> Result {
    let relay = TestRelay::spawn().await.e()?;
    let key = secret_key(8);
    let record = SignedRecord::sign(&key, 42, b"raw bytes".to_vec());
    relay.insert(key.public(), record.clone());

    let client = Client::builder().build();
    let got = client
        .resolve_record(&key.public(), &[relay.url().clone()])
        .await?;
    assert_eq!(got.seq, 42);
    assert_eq!(&got.value[..], b"raw bytes");

    // the default json codec refuses the same record
    let err = client
        .get_from(&key.public(), &[relay.url().clone()])
        .await
        .unwrap_err();
    assert!(matches!(
        err.failures()[0].error,
        RelayError::Decode { .. }
    ));
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn publish_pre_signed_record() -> Result {
    let relay = TestRelay::spawn().await.e()?;
    let key = secret_key(9);
    let client = Client::builder().build();
    let record = client.create_put_request(&key, &json!({ "n": 1 }))?;

    let put = client
        .publish_record(&key.public(), record.clone(), &[relay.url().clone()])
        .await?;
    assert_eq!(put.record, record);
    assert_eq!(relay.record(&key.public()), Some(record));
    Ok(())
}
