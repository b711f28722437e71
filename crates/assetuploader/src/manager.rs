//! Asset lifecycle: signed upload, deferred confirmation, signed download.
//!
//! An asset goes through two keys in its bucket:
//! - `temp/<id>`: where the client uploads through the signed PUT URL
//! - `uploaded/<id>`: a marker written when the URL is signed, tagged with
//!   the signing date and expiry, later replaced by the confirmed object
//!   tagged `status=uploaded`
//!
//! Confirmation is deferred until the signed URL has expired (plus a grace
//! margin), so a client cannot keep writing to an asset that was already
//! handed out for download.

use std::sync::Arc;
use std::time::Duration;

use assetuploader_scheduler::{Job, JobError, JobScheduler, JobTask};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::AssetError;
use crate::storage::{AMZ_DATE_FORMAT, ObjectStorage, Tags};

const TEMPORARY_PREFIX: &str = "temp/";
const UPLOADED_PREFIX: &str = "uploaded/";

const STATUS_TAG: &str = "status";
const UPLOADED: &str = "uploaded";
const DATE_TAG: &str = "X-Amz-Date";
const EXPIRES_TAG: &str = "X-Amz-Expires";

/// Confirmation waits this multiple of the signed URL's lifetime.
const CONFIRM_GRACE_FACTOR: f64 = 1.10;

fn temporary_key(asset_id: Uuid) -> String {
    format!("{}{}", TEMPORARY_PREFIX, asset_id)
}

fn uploaded_key(asset_id: Uuid) -> String {
    format!("{}{}", UPLOADED_PREFIX, asset_id)
}

fn is_uploaded(tags: &Tags) -> bool {
    tags.get(STATUS_TAG).is_some_and(|status| status == UPLOADED)
}

/// When the upload behind a marker may be confirmed: the signing date plus
/// the URL lifetime scaled by the grace factor, rounded to whole seconds.
pub fn confirmation_date(tags: &Tags) -> Result<DateTime<Utc>, AssetError> {
    let expires = tags
        .get(EXPIRES_TAG)
        .ok_or_else(|| AssetError::Internal(format!("missing {} tag", EXPIRES_TAG)))?;
    let expires: u64 = expires.parse().map_err(|e| {
        AssetError::Internal(format!("invalid {} tag '{}': {}", EXPIRES_TAG, expires, e))
    })?;

    let signed_at = tags
        .get(DATE_TAG)
        .ok_or_else(|| AssetError::Internal(format!("missing {} tag", DATE_TAG)))?;
    let signed_at = NaiveDateTime::parse_from_str(signed_at, AMZ_DATE_FORMAT)
        .map_err(|e| {
            AssetError::Internal(format!("invalid {} tag '{}': {}", DATE_TAG, signed_at, e))
        })?
        .and_utc();

    let grace = (expires as f64 * CONFIRM_GRACE_FACTOR).round() as i64;
    Ok(signed_at + chrono::Duration::seconds(grace))
}

/// Manages the lifecycle of assets in object storage.
#[derive(Clone)]
pub struct AssetManager {
    storage: Arc<dyn ObjectStorage>,
    scheduler: Arc<dyn JobScheduler>,
    put_expiration: Duration,
}

impl AssetManager {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        scheduler: Arc<dyn JobScheduler>,
        put_expiration: Duration,
    ) -> Self {
        Self {
            storage,
            scheduler,
            put_expiration,
        }
    }

    pub fn put_expiration(&self) -> Duration {
        self.put_expiration
    }

    /// Sign an upload URL for a new asset and record when it was signed.
    #[tracing::instrument(skip(self))]
    pub async fn put_url(&self, bucket: &str, asset_id: Uuid) -> Result<String, AssetError> {
        let signed = self
            .storage
            .presign_put(bucket, &temporary_key(asset_id), self.put_expiration)
            .await?;

        let tags = Tags::from([
            (
                DATE_TAG.to_string(),
                signed.signed_at.format(AMZ_DATE_FORMAT).to_string(),
            ),
            (EXPIRES_TAG.to_string(), signed.expires_in.as_secs().to_string()),
        ]);
        self.storage
            .put_object(bucket, &uploaded_key(asset_id), tags)
            .await?;

        debug!(expires_in_secs = signed.expires_in.as_secs(), "signed upload url");
        Ok(signed.url)
    }

    /// Record that the client finished uploading. Confirmation runs once the
    /// signed upload URL has expired.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn uploaded(
        &self,
        bucket: &str,
        asset_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<(), AssetError> {
        let tags = self.marker_tags(bucket, asset_id).await?;
        if is_uploaded(&tags) {
            return Err(already_uploaded(asset_id));
        }

        let execution_date = confirmation_date(&tags)?;
        let task = ConfirmUpload {
            storage: Arc::clone(&self.storage),
            bucket: bucket.to_string(),
            asset_id,
        };
        let job = Job::new_fixed_date(asset_id.to_string(), task, execution_date);
        self.scheduler.schedule(job, cancel).await?;

        info!(%execution_date, "upload confirmation scheduled");
        Ok(())
    }

    /// Sign a download URL for a confirmed asset.
    #[tracing::instrument(skip(self))]
    pub async fn get_url(
        &self,
        bucket: &str,
        asset_id: Uuid,
        timeout: Duration,
    ) -> Result<String, AssetError> {
        let tags = self.marker_tags(bucket, asset_id).await?;
        if !is_uploaded(&tags) {
            return Err(AssetError::NotFound(format!(
                "asset {} is not marked as uploaded",
                asset_id
            )));
        }

        let signed = self
            .storage
            .presign_get(bucket, &uploaded_key(asset_id), timeout)
            .await?;
        Ok(signed.url)
    }

    async fn marker_tags(&self, bucket: &str, asset_id: Uuid) -> Result<Tags, AssetError> {
        marker_tags(self.storage.as_ref(), bucket, asset_id).await
    }
}

async fn marker_tags(
    storage: &dyn ObjectStorage,
    bucket: &str,
    asset_id: Uuid,
) -> Result<Tags, AssetError> {
    storage
        .get_tags(bucket, &uploaded_key(asset_id))
        .await
        .map_err(|e| match e {
            AssetError::NotFound(_) => asset_not_found(asset_id),
            other => other,
        })
}

fn asset_not_found(asset_id: Uuid) -> AssetError {
    AssetError::NotFound(format!("asset {} is not found", asset_id))
}

fn already_uploaded(asset_id: Uuid) -> AssetError {
    AssetError::Conflict(format!("asset {} already uploaded", asset_id))
}

/// Job callback that promotes an uploaded asset to its final key.
///
/// Safe to run more than once: an asset that is already confirmed is left
/// alone.
pub struct ConfirmUpload {
    storage: Arc<dyn ObjectStorage>,
    bucket: String,
    asset_id: Uuid,
}

impl ConfirmUpload {
    async fn confirm(&self) -> Result<(), AssetError> {
        let mut tags = marker_tags(self.storage.as_ref(), &self.bucket, self.asset_id).await?;
        if is_uploaded(&tags) {
            debug!(asset_id = %self.asset_id, "asset already confirmed");
            return Ok(());
        }

        tags.insert(STATUS_TAG.to_string(), UPLOADED.to_string());
        self.storage
            .copy_object(
                &self.bucket,
                &temporary_key(self.asset_id),
                &uploaded_key(self.asset_id),
                tags,
            )
            .await
            .map_err(|e| match e {
                // The client never used its upload URL
                AssetError::NotFound(_) => asset_not_found(self.asset_id),
                other => other,
            })?;

        info!(asset_id = %self.asset_id, "asset upload confirmed");
        Ok(())
    }
}

#[async_trait]
impl JobTask for ConfirmUpload {
    async fn run(&self) -> Result<(), JobError> {
        Ok(self.confirm().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn tags(date: &str, expires: &str) -> Tags {
        Tags::from([
            (DATE_TAG.to_string(), date.to_string()),
            (EXPIRES_TAG.to_string(), expires.to_string()),
        ])
    }

    #[test]
    fn test_keys() {
        let id = Uuid::nil();
        assert_eq!(temporary_key(id), "temp/00000000-0000-0000-0000-000000000000");
        assert_eq!(uploaded_key(id), "uploaded/00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn test_confirmation_date_adds_grace() {
        let date = confirmation_date(&tags("20240601T120000Z", "30")).unwrap();
        assert_eq!(date, Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 33).unwrap());
    }

    #[test]
    fn test_confirmation_date_rounds_to_nearest_second() {
        // 5 * 1.1 = 5.5 rounds up, 4 * 1.1 = 4.4 rounds down
        let date = confirmation_date(&tags("20240601T120000Z", "5")).unwrap();
        assert_eq!(date, Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 6).unwrap());
        let date = confirmation_date(&tags("20240601T120000Z", "4")).unwrap();
        assert_eq!(date, Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 4).unwrap());
    }

    #[test]
    fn test_confirmation_date_rejects_bad_tags() {
        assert!(matches!(
            confirmation_date(&tags("yesterday", "30")),
            Err(AssetError::Internal(_))
        ));
        assert!(matches!(
            confirmation_date(&tags("20240601T120000Z", "soon")),
            Err(AssetError::Internal(_))
        ));
        assert!(matches!(confirmation_date(&Tags::new()), Err(AssetError::Internal(_))));
    }

    #[test]
    fn test_is_uploaded() {
        let mut marker = tags("20240601T120000Z", "30");
        assert!(!is_uploaded(&marker));
        marker.insert(STATUS_TAG.to_string(), "pending".to_string());
        assert!(!is_uploaded(&marker));
        marker.insert(STATUS_TAG.to_string(), UPLOADED.to_string());
        assert!(is_uploaded(&marker));
    }

    proptest! {
        #[test]
        fn confirmation_never_precedes_expiry(
            signed_secs in 0i64..4_000_000_000i64,
            expires in 0u64..604_800u64,
        ) {
            let signed_at = Utc.timestamp_opt(signed_secs, 0).unwrap();
            let marker = tags(&signed_at.format(AMZ_DATE_FORMAT).to_string(), &expires.to_string());

            let date = confirmation_date(&marker).unwrap();
            prop_assert!(date >= signed_at + chrono::Duration::seconds(expires as i64));
        }
    }
}
