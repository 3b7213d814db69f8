use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Destination for a rendered config.
#[async_trait]
pub trait ConfigDeployer {
    async fn deploy(&self, text: &str) -> anyhow::Result<()>;
}

pub struct FileDeployer {
    pub path: PathBuf,
}

#[async_trait]
impl ConfigDeployer for FileDeployer {
    async fn deploy(&self, text: &str) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.path, text).await?;
        Ok(())
    }
}

pub struct StdoutDeployer;

#[async_trait]
impl ConfigDeployer for StdoutDeployer {
    async fn deploy(&self, text: &str) -> anyhow::Result<()> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(text.as_bytes()).await?;
        if !text.ends_with('\n') {
            stdout.write_all(b"\n").await?;
        }
        stdout.flush().await?;
        Ok(())
    }
}
