use crate::config::{CredentialScope, RunConfig};
use crate::s3_store::S3Store;
use crate::store::ObjectStore;
use anyhow::{Context, Result};
use aws_config::SdkConfig;
use aws_sdk_s3::{Client, config::Region};
use aws_smithy_runtime::client::http::hyper_014::HyperClientBuilder;
use aws_smithy_types::retry::RetryConfig;
use aws_smithy_types::timeout::TimeoutConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const MAX_ATTEMPTS: u32 = 5;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
const READ_TIMEOUT: Duration = Duration::from_secs(600);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const FALLBACK_REGION: &str = "us-east-1";

/// The two storage clients of a run. Built once, shared read-only by every worker.
pub struct Sessions {
    pub source: Arc<dyn ObjectStore>,
    pub dest: Arc<dyn ObjectStore>,
    pub source_region: String,
    pub dest_region: String,
}

/// Connections kept per host: every worker holds one for its GET stream and
/// one for its part uploads.
pub fn pool_size(workers: usize) -> usize {
    (workers * 2).max(8)
}

impl Sessions {
    /// Resolves each side's credentials and region independently.
    pub async fn connect(cfg: &RunConfig) -> Result<Self> {
        let pool = pool_size(cfg.workers);

        let (source_client, source_region) =
            scoped_client(&cfg.source_scope, cfg.source_bucket(), pool)
                .await
                .context("Failed to set up the source client")?;
        let (dest_client, dest_region) = scoped_client(&cfg.dest_scope, &cfg.dest.bucket, pool)
            .await
            .context("Failed to set up the destination client")?;

        info!(
            "Source profile {}, destination profile {}",
            cfg.source_scope.profile.as_deref().unwrap_or("default"),
            cfg.dest_scope.profile.as_deref().unwrap_or("default")
        );

        Ok(Self {
            source: Arc::new(S3Store::new(source_client)),
            dest: Arc::new(S3Store::new(dest_client)),
            source_region,
            dest_region,
        })
    }
}

/// Loads shared config for one credential scope with a connection pool sized for `pool_size`.
async fn load_scope_config(scope: &CredentialScope, pool_size: usize) -> SdkConfig {
    // Configure a custom Hyper client with increased connection pool limits
    let mut hyper_builder = hyper::Client::builder();
    hyper_builder.pool_max_idle_per_host(pool_size);
    hyper_builder.retry_canceled_requests(true);
    hyper_builder.http2_only(false); // Allow fallback to HTTP/1.1
    hyper_builder.pool_idle_timeout(POOL_IDLE_TIMEOUT);

    let http_client = HyperClientBuilder::new()
        .hyper_builder(hyper_builder)
        .build_https();

    let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .http_client(http_client)
        .retry_config(RetryConfig::standard().with_max_attempts(MAX_ATTEMPTS))
        .timeout_config(
            TimeoutConfig::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .read_timeout(READ_TIMEOUT)
                .build(),
        );

    if let Some(profile) = &scope.profile {
        config_loader = config_loader.profile_name(profile);
    }
    if let Some(r) = &scope.region {
        config_loader = config_loader.region(Region::new(r.clone()));
    }

    config_loader.load().await
}

fn client_in_region(config: &SdkConfig, region: &str) -> Client {
    let s3_config = aws_sdk_s3::config::Builder::from(config)
        .region(Region::new(region.to_string()))
        .build();
    Client::from_conf(s3_config)
}

/// Client for one scope, bound to the bucket's region.
async fn scoped_client(
    scope: &CredentialScope,
    bucket: &str,
    pool_size: usize,
) -> Result<(Client, String)> {
    let config = load_scope_config(scope, pool_size).await;
    let loaded_region = config
        .region()
        .map(|r| r.to_string())
        .unwrap_or_else(|| FALLBACK_REGION.to_string());
    let client = client_in_region(&config, &loaded_region);

    let region = get_bucket_region(&client, bucket, scope.region.as_ref()).await?;
    if region == loaded_region {
        return Ok((client, region));
    }
    Ok((client_in_region(&config, &region), region))
}

/// Detect the region of an S3 bucket.
pub async fn get_bucket_region(
    client: &Client,
    bucket: &str,
    user_override: Option<&String>,
) -> Result<String> {
    if let Some(r) = user_override {
        return Ok(r.clone());
    }
    match client.get_bucket_location().bucket(bucket).send().await {
        Ok(loc) => Ok(normalize_location_constraint(
            loc.location_constraint().map(|c| c.as_str()),
        )),
        Err(e) => {
            let err_str = format!("{}", e);
            if err_str.contains("NoSuchBucket")
                || err_str.contains("NotFound")
                || err_str.contains("not found")
            {
                anyhow::bail!("Bucket '{}' does not exist.", bucket);
            } else if err_str.contains("AccessDenied") || err_str.contains("Access Denied") {
                anyhow::bail!(
                    "Access denied for bucket '{}'. Check the profile's permissions or pass the region explicitly.",
                    bucket
                );
            }

            let service_err = e.into_service_error();
            anyhow::bail!(
                "Could not verify bucket '{}'. Ensure it exists and you have access.\nDetails: {}",
                bucket,
                service_err
            );
        }
    }
}

/// GetBucketLocation returns no constraint for us-east-1 and the legacy `EU` alias for eu-west-1.
pub fn normalize_location_constraint(constraint: Option<&str>) -> String {
    match constraint {
        None | Some("") => FALLBACK_REGION.to_string(),
        Some("EU") => "eu-west-1".to_string(),
        Some(region) => region.to_string(),
    }
}
