//! Logging and optional OTLP trace export.
//!
//! Tracing export is enabled when `OTEL_EXPORTER_OTLP_ENDPOINT` is set; only
//! gRPC is supported. Headers come from `OTEL_EXPORTER_OTLP_HEADERS`
//! (`key=value,...`); keys ending in `-bin` carry base64 values.

use anyhow::{Result, anyhow};
use base64ct::{Base64, Encoding};
use once_cell::sync::OnceCell;
use opentelemetry::{KeyValue, global, propagation::TextMapCompositePropagator, trace::TracerProvider as _};
use opentelemetry_otlp::{Compression, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    Resource,
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{SdkTracerProvider, Tracer},
};
use std::{env::var, time::Duration};
use tonic::{
    metadata::{Ascii, Binary, MetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{Level, debug};
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};
use ulid::Ulid;

const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";
const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

static TRACER_PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

/// Exporter settings read from the standard `OTEL_*` variables.
#[derive(Debug, PartialEq, Eq)]
struct OtlpSettings {
    endpoint: String,
    headers: Vec<(String, String)>,
    instance_id: String,
}

impl OtlpSettings {
    fn from_env() -> Self {
        if let Ok(protocol) = var("OTEL_EXPORTER_OTLP_PROTOCOL")
            && protocol != "grpc"
        {
            debug!("OTEL_EXPORTER_OTLP_PROTOCOL='{protocol}' ignored: only 'grpc' is supported");
        }

        Self {
            endpoint: normalize_endpoint(
                &var("OTEL_EXPORTER_OTLP_ENDPOINT")
                    .unwrap_or_else(|_| DEFAULT_OTLP_ENDPOINT.to_string()),
            ),
            headers: var("OTEL_EXPORTER_OTLP_HEADERS")
                .map(|raw| parse_header_pairs(&raw))
                .unwrap_or_default(),
            instance_id: var("OTEL_SERVICE_INSTANCE_ID")
                .unwrap_or_else(|_| Ulid::new().to_string()),
        }
    }

    /// Host to verify against when the endpoint is `https`.
    fn tls_domain(&self) -> Option<&str> {
        self.endpoint
            .strip_prefix("https://")
            .and_then(|rest| rest.split('/').next())
            .and_then(|authority| authority.split(':').next())
            .filter(|host| !host.is_empty())
    }
}

fn parse_header_pairs(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}

fn metadata_from_pairs(pairs: &[(String, String)]) -> Result<MetadataMap> {
    let mut metadata = MetadataMap::with_capacity(pairs.len());

    for (key, value) in pairs {
        let key = key.to_ascii_lowercase();
        if key.ends_with("-bin") {
            let bytes = Base64::decode_vec(value)
                .map_err(|err| anyhow!("failed to base64-decode value for key {key}: {err}"))?;
            let name = MetadataKey::<Binary>::from_bytes(key.as_bytes())
                .map_err(|err| anyhow!("invalid binary metadata key {key}: {err}"))?;
            metadata.insert_bin(name, MetadataValue::from_bytes(&bytes));
        } else {
            let name = MetadataKey::<Ascii>::from_bytes(key.as_bytes())
                .map_err(|err| anyhow!("invalid ASCII metadata key {key}: {err}"))?;
            let value: MetadataValue<Ascii> = value
                .parse()
                .map_err(|err| anyhow!("invalid ASCII metadata value for key {key}: {err}"))?;
            metadata.insert(name, value);
        }
    }

    Ok(metadata)
}

/// Endpoints without a scheme default to `https`.
fn normalize_endpoint(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint.trim_end_matches('/'))
    }
}

fn init_tracer(settings: &OtlpSettings) -> Result<Tracer> {
    let mut builder = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&settings.endpoint)
        .with_compression(Compression::Gzip)
        .with_timeout(EXPORT_TIMEOUT);

    if let Some(domain) = settings.tls_domain() {
        builder = builder.with_tls_config(
            ClientTlsConfig::new()
                .domain_name(domain.to_string())
                .with_native_roots(),
        );
    }

    if !settings.headers.is_empty() {
        builder = builder.with_metadata(metadata_from_pairs(&settings.headers)?);
    }

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(builder.build()?)
        .with_resource(
            Resource::builder_empty()
                .with_attributes(vec![
                    KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                    KeyValue::new("service.instance.id", settings.instance_id.clone()),
                ])
                .build(),
        )
        .build();

    let _ = TRACER_PROVIDER.set(provider.clone());

    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));

    Ok(provider.tracer(env!("CARGO_PKG_NAME")))
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if the exporter or the subscriber cannot be installed.
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_target(false)
        .pretty();

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity_level.unwrap_or(Level::ERROR).into())
        .from_env_lossy()
        .add_directive("hyper=error".parse()?)
        .add_directive("tokio=error".parse()?)
        .add_directive("sqlx=warn".parse()?)
        .add_directive("opentelemetry_sdk=warn".parse()?);

    if var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = init_tracer(&OtlpSettings::from_env())?;
        let subscriber = Registry::default()
            .with(fmt_layer)
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .with(filter);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = Registry::default().with(fmt_layer).with(filter);
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}

/// Flush and stop the exporter, if one was installed.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        debug!("shutting down tracer provider");
        if let Err(err) = provider.shutdown() {
            debug!("tracer provider shutdown failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn header_pairs_skip_malformed_entries() {
        assert!(parse_header_pairs("").is_empty());
        assert_eq!(
            parse_header_pairs("key1 = value1 ,malformed, key2=a=b"),
            pairs(&[("key1", "value1"), ("key2", "a=b")])
        );
    }

    #[test]
    fn metadata_accepts_ascii_and_binary() -> Result<()> {
        let metadata = metadata_from_pairs(&pairs(&[
            ("Authorization", "Bearer token123"),
            ("custom-bin", "YmluYXJ5IGRhdGE="),
        ]))?;
        assert_eq!(metadata.len(), 2);
        assert!(metadata.get("authorization").is_some());
        Ok(())
    }

    #[test]
    fn metadata_rejects_bad_base64() {
        let err = metadata_from_pairs(&pairs(&[("custom-bin", "not-valid-base64!!!")]));
        assert!(
            err.is_err_and(|err| err.to_string().contains("failed to base64-decode"))
        );
    }

    #[test]
    fn endpoints_default_to_https() {
        assert_eq!(normalize_endpoint("http://localhost:4317"), "http://localhost:4317");
        assert_eq!(normalize_endpoint("collector:4317/"), "https://collector:4317");
        assert_eq!(
            normalize_endpoint("https://api.example.com:4317/v1/traces"),
            "https://api.example.com:4317/v1/traces"
        );
    }

    #[test]
    fn tls_domain_only_for_https() {
        let settings = OtlpSettings {
            endpoint: "https://otel.example.com:4317/v1".to_string(),
            headers: Vec::new(),
            instance_id: "test".to_string(),
        };
        assert_eq!(settings.tls_domain(), Some("otel.example.com"));

        let plain = OtlpSettings {
            endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            ..settings
        };
        assert_eq!(plain.tls_domain(), None);
    }

    #[test]
    fn settings_from_env() {
        temp_env::with_vars(
            [
                ("OTEL_EXPORTER_OTLP_ENDPOINT", Some("collector:4317")),
                ("OTEL_EXPORTER_OTLP_HEADERS", Some("x-team=auth")),
                ("OTEL_SERVICE_INSTANCE_ID", Some("node-1")),
                ("OTEL_EXPORTER_OTLP_PROTOCOL", None),
            ],
            || {
                assert_eq!(
                    OtlpSettings::from_env(),
                    OtlpSettings {
                        endpoint: "https://collector:4317".to_string(),
                        headers: pairs(&[("x-team", "auth")]),
                        instance_id: "node-1".to_string(),
                    }
                );
            },
        );
    }

    #[test]
    fn shutdown_without_provider_is_a_noop() {
        shutdown_tracer();
    }
}
