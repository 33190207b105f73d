use cobalt_stomp::{AckMode, ClientConfig, Endpoint, Session};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Acknowledge messages inside a transaction, then abort it: every
    // message acked under the transaction is re-delivered to its
    // subscription, in the order it was acked.

    let config =
        ClientConfig::single(Endpoint::new("127.0.0.1", 61613).credentials("guest", "guest"));
    let session = Session::connect(config).await?;

    let mut subscription = session
        .subscribe("/queue/orders", AckMode::ClientIndividual)
        .await?;

    session.begin("tx-orders").await?;

    for i in 0..3 {
        session
            .publish(
                "/queue/orders",
                format!("order-{i}").into_bytes(),
                vec![("transaction".to_string(), "tx-orders".to_string())],
            )
            .await?;
    }

    // Ack whatever arrives within a couple of seconds under the transaction.
    while let Ok(Some(frame)) =
        tokio::time::timeout(Duration::from_secs(2), subscription.next()).await
    {
        println!("got: {}", String::from_utf8_lossy(&frame.body));
        session.ack_in(&frame, "tx-orders").await?;
    }

    // Abort: the broker discards the transactional sends/acks, and the
    // client replays the acked messages locally.
    session.abort("tx-orders").await?;

    while let Ok(Some(frame)) =
        tokio::time::timeout(Duration::from_millis(500), subscription.next()).await
    {
        println!("replayed: {}", String::from_utf8_lossy(&frame.body));
    }

    session.disconnect().await?;
    Ok(())
}
