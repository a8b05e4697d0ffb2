use std::path::Path;

use crate::resource::{self, RepositoryName};

use super::common::display;

pub async fn remove(root: &Path, repository: &str) -> anyhow::Result<()> {
    let repository: RepositoryName = repository.parse()?;
    resource::remove(root, &repository).await?;
    display::note(&format!("Successfully removed {}", repository.name));
    Ok(())
}
