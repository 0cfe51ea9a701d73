mod device;
mod host;
mod logging;
mod shelly;
mod sync;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
