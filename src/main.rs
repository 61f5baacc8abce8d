use logflow::error::LogflowError;

#[tokio::main]
async fn main() -> Result<(), LogflowError> {
    logflow::app::run().await
}
