use anyhow::Result;
use classifier_client::{
    ApiClient, CancellationToken, ClassificationRequest, ClientConfig, JobOutcome, Progress,
    StreamingJobClient,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Server-side path of an already uploaded workbook
    let file_path = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: 01_stream_job <server file path>"))?;

    let config = ClientConfig::from_env();
    println!("Streaming classification job");
    println!("============================\n");
    println!("Backend: {}\n", config.base_url);

    let client = StreamingJobClient::new(ApiClient::new(config)?);
    let request = ClassificationRequest::new(file_path);

    // Cancel on Ctrl-C
    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let outcome = client
        .run(
            &request,
            |p: Progress| println!("[{}/{}] {:.0}%", p.current, p.total, p.fraction() * 100.0),
            &cancel,
        )
        .await?;

    match outcome {
        JobOutcome::Completed(result) => {
            println!("\n---");
            println!("History id: {}", result.history_id);
            println!("Status: {}", result.status);
            println!("Message: {}", result.message);
        }
        JobOutcome::Cancelled => println!("\nCancelled."),
    }

    Ok(())
}
