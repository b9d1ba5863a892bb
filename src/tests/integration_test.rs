use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use crate::auth::{JwtAuthenticator, TokenAuthenticator};
use crate::broker::Broker;
use crate::client::ClientSession;
use crate::config::{BrokerSettings, ClientSettings};
use crate::transport::message::AuthPayload;
use crate::utils::Error;

const TOKEN: &str = "password";
const DEADLINE: Duration = Duration::from_secs(2);

async fn start_broker() -> (Broker, SocketAddr) {
    let broker = Broker::new(
        BrokerSettings::default(),
        Arc::new(TokenAuthenticator::new(TOKEN)),
    );
    let addr = broker.serve("127.0.0.1:0").await.unwrap();
    (broker, addr)
}

async fn connect(addr: SocketAddr, client_id: &str) -> ClientSession {
    ClientSession::connect(addr, AuthPayload::new(client_id, TOKEN))
        .await
        .unwrap()
}

/// Subscribe with a callback that forwards every delivery into a channel.
async fn subscribe_collecting(
    session: &ClientSession,
    topic: &str,
) -> mpsc::UnboundedReceiver<Bytes> {
    let (tx, rx) = mpsc::unbounded_channel();
    session
        .subscribe(topic, move |data| {
            let _ = tx.send(data);
        })
        .await
        .unwrap();
    rx
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    timeout(DEADLINE, async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn integration_publish_reaches_subscriber_once() {
    let (_broker, addr) = start_broker().await;
    let subscriber = connect(addr, "sub1").await;
    let publisher = connect(addr, "pub1").await;

    let mut deliveries = subscribe_collecting(&subscriber, "news").await;
    publisher.publish("news", "hello").await.unwrap();

    let data = timeout(DEADLINE, deliveries.recv()).await.unwrap().unwrap();
    assert_eq!(data, Bytes::from_static(b"hello"));

    sleep(Duration::from_millis(50)).await;
    assert!(deliveries.try_recv().is_err(), "delivered more than once");
}

#[tokio::test]
async fn integration_every_subscriber_gets_a_copy() {
    let (_broker, addr) = start_broker().await;
    let first = connect(addr, "sub1").await;
    let second = connect(addr, "sub2").await;
    let publisher = connect(addr, "pub1").await;

    let mut first_rx = subscribe_collecting(&first, "news").await;
    let mut second_rx = subscribe_collecting(&second, "news").await;
    publisher.publish("news", "hello").await.unwrap();

    for rx in [&mut first_rx, &mut second_rx] {
        let data = timeout(DEADLINE, rx.recv()).await.unwrap().unwrap();
        assert_eq!(data, Bytes::from_static(b"hello"));
    }
}

#[tokio::test]
async fn integration_empty_client_id_is_rejected() {
    let (broker, addr) = start_broker().await;
    let result = ClientSession::connect(addr, AuthPayload::new("", TOKEN)).await;
    assert!(matches!(result, Err(Error::AuthRejected(_))));
    assert_eq!(broker.connection_count(), 0);
}

#[tokio::test]
async fn integration_unsubscribed_client_receives_nothing() {
    let (broker, addr) = start_broker().await;
    let subscriber = connect(addr, "sub1").await;
    let publisher = connect(addr, "pub1").await;

    let mut deliveries = subscribe_collecting(&subscriber, "news").await;
    subscriber.unsubscribe("news").await.unwrap();
    assert_eq!(broker.subscriber_count("news"), 0);

    publisher.publish("news", "hello").await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert!(deliveries.try_recv().is_err());
}

#[tokio::test]
async fn integration_back_to_back_publishes_get_their_own_acks() {
    let (_broker, addr) = start_broker().await;
    let subscriber = connect(addr, "sub1").await;
    let publisher = connect(addr, "pub1").await;
    let mut deliveries = subscribe_collecting(&subscriber, "news").await;

    let (first, second) = tokio::join!(
        publisher.publish("news", "one"),
        publisher.publish("news", "two"),
    );
    first.unwrap();
    second.unwrap();

    let mut received = Vec::new();
    for _ in 0..2 {
        received.push(timeout(DEADLINE, deliveries.recv()).await.unwrap().unwrap());
    }
    received.sort();
    assert_eq!(received, vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]);
}

#[tokio::test]
async fn integration_disconnect_cleans_up_subscriptions() {
    let (broker, addr) = start_broker().await;
    let subscriber = connect(addr, "sub1").await;
    let _rx = subscribe_collecting(&subscriber, "news").await;
    assert_eq!(broker.subscriber_count("news"), 1);

    subscriber.close().await;
    wait_until(|| broker.connection_count() == 0).await;
    assert_eq!(broker.topic_count(), 0);

    // publishing to the abandoned topic still succeeds
    let publisher = connect(addr, "pub1").await;
    publisher.publish("news", "anyone?").await.unwrap();
}

#[tokio::test]
async fn integration_silent_broker_times_out_requests() {
    // accepts and authenticates, then never answers
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut connection = crate::transport::Connection::inbound(stream, 1024);
        connection
            .accept_handshake(&TokenAuthenticator::new(TOKEN), DEADLINE)
            .await
            .unwrap();
        sleep(Duration::from_secs(5)).await;
        drop(connection);
    });

    let settings = ClientSettings {
        request_timeout_ms: 100,
        ..ClientSettings::default()
    };
    let session = ClientSession::connect_with(addr, AuthPayload::new("sub1", TOKEN), &settings)
        .await
        .unwrap();

    let result = session.publish("news", "hello").await;
    assert!(matches!(result, Err(Error::RequestTimeout { .. })), "{result:?}");
    assert!(session.is_connected());
}

#[tokio::test]
async fn integration_jwt_broker_checks_subject() {
    let authenticator = Arc::new(JwtAuthenticator::new(b"secret"));
    let token = authenticator
        .issue("sub1", Duration::from_secs(60))
        .unwrap();
    let broker = Broker::new(BrokerSettings::default(), authenticator);
    let addr = broker.serve("127.0.0.1:0").await.unwrap();

    let session = ClientSession::connect(addr, AuthPayload::new("sub1", token.clone()))
        .await
        .unwrap();
    session.publish("news", "signed").await.unwrap();

    let stolen = ClientSession::connect(addr, AuthPayload::new("intruder", token)).await;
    assert!(matches!(stolen, Err(Error::AuthRejected(_))));
}
