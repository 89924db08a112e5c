//! Biomass report files.
//!
//! Reports land in `<report_dir>/<manipulation_id>.csv`: one header line
//! followed by the payload. Without a configured directory the writer does
//! nothing.

use std::path::PathBuf;

use ecosim_types::ManipulationId;
use tracing::info;

/// Writes biomass reports to disk.
#[derive(Debug, Clone, Default)]
pub struct ReportWriter {
    dir: Option<PathBuf>,
}

impl ReportWriter {
    /// A writer targeting `dir`, or a no-op writer for `None`.
    pub const fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    /// Whether reports are written at all.
    pub const fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    /// Write one report. Returns the path written, if any.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the directory or file cannot be written.
    pub async fn write(
        &self,
        manipulation_id: &ManipulationId,
        header: &str,
        body: &str,
    ) -> Result<Option<PathBuf>, std::io::Error> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        tokio::fs::create_dir_all(dir).await?;

        let file_name: String = manipulation_id
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let path = dir.join(format!("{file_name}.csv"));
        tokio::fs::write(&path, format!("{header}\n{body}")).await?;

        info!(path = %path.display(), "wrote biomass report");
        Ok(Some(path))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_writer_writes_nothing() {
        let writer = ReportWriter::default();
        let written = writer
            .write(&ManipulationId::new("m-1"), "Job_id: 1", "node_id,1\n")
            .await
            .unwrap();
        assert!(written.is_none());
    }

    #[tokio::test]
    async fn writes_header_then_body() {
        let dir = std::env::temp_dir().join(format!("ecosim-report-{}", std::process::id()));
        let writer = ReportWriter::new(Some(dir.clone()));

        let path = writer
            .write(&ManipulationId::new("m/../1"), "Job_id: 7", "node_id,1\n3,10.00\n")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(path, dir.join("m____1.csv"));

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.starts_with("Job_id: 7\nnode_id,1\n"));
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
