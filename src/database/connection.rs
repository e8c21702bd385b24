use log::error;
use openssl::ssl::{SslConnector, SslMethod};
use postgres_openssl::MakeTlsConnector;
use tokio::time::Duration;
use url::Url;

const WAIT_BETWEEN_RETRIES: Duration = Duration::from_secs(1);

pub fn create_ssl_connector(sslrootcert_path: &str) -> Result<MakeTlsConnector, String> {
    Ok(MakeTlsConnector::new(ssl_connector(sslrootcert_path)?))
}

/// TLS connector that only trusts servers signed by the CA at `sslrootcert_path`
fn ssl_connector(sslrootcert_path: &str) -> Result<SslConnector, String> {
    let mut builder =
        SslConnector::builder(SslMethod::tls()).map_err(|e| format!("SSL builder error: {}", e))?;

    builder
        .set_ca_file(sslrootcert_path)
        .map_err(|e| format!("Error loading CA cert: {}", e))?;

    Ok(builder.build())
}

/// Connection URL with the `sslrootcert` parameter split off, since
/// tokio-postgres does not understand it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseTarget {
    pub url: String,
    pub sslrootcert: String,
}

pub fn parse_database_url(database_url: &str) -> Result<DatabaseTarget, String> {
    let url = Url::parse(database_url).map_err(|e| format!("URL parse error: {}", e))?;

    let mut sslrootcert = None;
    let mut clean_params = Vec::new();
    for (key, value) in url.query_pairs() {
        if key == "sslrootcert" {
            sslrootcert = Some(value.to_string());
        } else {
            clean_params.push((key.into_owned(), value.into_owned()));
        }
    }

    let sslrootcert = sslrootcert.ok_or_else(|| "sslrootcert parameter missing".to_string())?;

    let mut clean_url = url.clone();
    clean_url.set_query(None);
    if !clean_params.is_empty() {
        let query = clean_params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        clean_url.set_query(Some(&query));
    }

    Ok(DatabaseTarget {
        url: clean_url.to_string(),
        sslrootcert,
    })
}

/// Run `operation` on a fresh connection, retrying up to `max_retries`
/// times with a one second pause between attempts
pub async fn execute_with_retry<F, Fut>(
    database_url: &str,
    max_retries: usize,
    operation: F,
) -> Result<(), String>
where
    F: Fn(tokio_postgres::Client) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<u64, tokio_postgres::Error>> + Send,
{
    let target = parse_database_url(database_url)?;

    for attempt in 0..max_retries {
        let connector = match create_ssl_connector(&target.sslrootcert) {
            Ok(c) => c,
            Err(e) => {
                error!("Attempt {}: SSL connector error: {}", attempt + 1, e);
                continue;
            }
        };

        match tokio_postgres::connect(&target.url, connector).await {
            Ok((client, connection)) => {
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        error!("Connection error: {}", e);
                    }
                });

                match operation(client).await {
                    Ok(_) => return Ok(()),
                    Err(e) => error!("Attempt {}: query error: {}", attempt + 1, e),
                }
            }
            Err(e) => error!("Attempt {}: connection error: {}", attempt + 1, e),
        }

        if attempt + 1 < max_retries {
            tokio::time::sleep(WAIT_BETWEEN_RETRIES).await;
        }
    }

    Err("Max retries exceeded".into())
}
