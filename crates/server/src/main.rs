#[tokio::main]
async fn main() -> anyhow::Result<()> {
    aura_server::run().await
}
