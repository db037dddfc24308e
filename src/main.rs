#[tokio::main]
async fn main() -> anyhow::Result<()> {
    screen_recorder_lib::run().await?;
    Ok(())
}
