use chathub::{load_config, logging};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_tracing();

    // The chat hub is embedded by a host that supplies the execution engine;
    // the binary only validates and prints the effective configuration.
    let config = load_config()?;

    tracing::info!("Loaded configuration:\n{}", config);

    Ok(())
}
