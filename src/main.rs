#[tokio::main]
async fn main() -> anyhow::Result<()> {
    creativity_engine::run().await
}
