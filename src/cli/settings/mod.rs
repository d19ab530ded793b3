//! Settings command

use super::{bootstrap, BackendArgs};
use crate::domain::cache::SettingsForm;

/// Prints the fields and scripts the backend adds to an admin form
pub async fn run(backend: &BackendArgs) -> anyhow::Result<()> {
    let (_, driver) = bootstrap(backend)?;

    let mut form = SettingsForm::new();
    driver.cache_settings(&mut form);

    println!("{}", serde_json::to_string_pretty(&form)?);
    Ok(())
}
