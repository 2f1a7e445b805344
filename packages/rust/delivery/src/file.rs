//! Local JSON-file destination for offline runs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use leadgen_shared::{LeadGenError, Result, VerifiedLead};

use crate::{COLUMNS, DeliveryBatch, LeadDestination};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LeadExport<'a> {
    title: String,
    job_id: String,
    columns: [&'static str; 6],
    rows: Vec<[String; 6]>,
    leads: &'a [VerifiedLead],
}

/// Writes one `leads-<job id>.json` per job under `output_dir`.
pub struct LocalFileDestination {
    output_dir: PathBuf,
}

impl LocalFileDestination {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
        }
    }
}

#[async_trait]
impl LeadDestination for LocalFileDestination {
    fn name(&self) -> &str {
        "file"
    }

    async fn write(&self, batch: &DeliveryBatch) -> Result<String> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| LeadGenError::io(&self.output_dir, e))?;

        let export = LeadExport {
            title: batch.title(),
            job_id: batch.job_id.to_string(),
            columns: COLUMNS,
            rows: batch.lead_rows(),
            leads: &batch.leads,
        };
        let json = serde_json::to_string_pretty(&export)
            .map_err(|e| LeadGenError::parse(format!("failed to encode leads: {e}")))?;

        let path = self.output_dir.join(format!("leads-{}.json", batch.job_id));
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| LeadGenError::io(&path, e))?;

        let absolute = tokio::fs::canonicalize(&path)
            .await
            .map_err(|e| LeadGenError::io(&path, e))?;
        Url::from_file_path(&absolute)
            .map(String::from)
            .map_err(|_| LeadGenError::DeliveryFailed(format!("no file URL for {}", absolute.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::batch;
    use leadgen_shared::JobId;

    #[tokio::test]
    async fn writes_one_file_per_job() {
        let dir = std::env::temp_dir().join(format!("leadgen-delivery-{}", JobId::new()));
        let destination = LocalFileDestination::new(&dir);
        let batch = batch();

        let locator = destination.write(&batch).await.unwrap();
        assert!(locator.starts_with("file://"));
        assert!(locator.ends_with(&format!("leads-{}.json", batch.job_id)));

        let path = Url::parse(&locator).unwrap().to_file_path().unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["columns"][5], "Verified");
        assert_eq!(written["rows"].as_array().unwrap().len(), 2);
        assert_eq!(written["leads"][0]["emailSource"], "mailto-link");
        assert_eq!(written["leads"][1]["verificationStatus"], "no-email");

        std::fs::remove_dir_all(&dir).ok();
    }
}
