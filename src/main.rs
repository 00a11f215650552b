#[tokio::main]
async fn main() {
    pizza::start_server().await;
}
