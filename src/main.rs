#[tokio::main]
async fn main() -> qnabot::error::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("qnabot=info,serenity=warn"),
    )
    .init();
    log::info!("Starting qnabot Discord bot");

    match qnabot::run().await {
        Ok(()) => {
            log::info!("Bot shut down successfully");
            Ok(())
        }
        Err(e) => {
            log::error!("Bot encountered an error: {}", e);
            Err(e)
        }
    }
}
