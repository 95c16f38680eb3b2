#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    event_feed_lib::run().await
}
