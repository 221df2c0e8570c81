use beaconwatch_service_lib::service_main;

#[tokio::main]
async fn main() {
    if let Err(error) = service_main().await {
        eprintln!("Service failed: {error:?}");
        std::process::exit(1);
    }
}
