#[tokio::main]
async fn main() {
    clearclaim_server::app::run().await;
}
