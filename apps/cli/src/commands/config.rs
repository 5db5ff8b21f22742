//! `vigil config`: print the effective configuration.

use anyhow::Result;
use vigil_serving::ServingConfig;

pub fn execute(config: &ServingConfig) -> Result<()> {
    print!("{}", config.to_toml_string()?);
    Ok(())
}
