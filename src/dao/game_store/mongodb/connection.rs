use std::time::Duration;

use mongodb::{Client, Database, bson::doc, options::ClientOptions};
use tokio::time::sleep;
use tracing::{debug, info};

use super::error::{MongoDaoError, MongoResult};

/// How long to wait for the first ping before giving up on a server.
#[derive(Debug, Clone, Copy)]
pub(super) struct PingRetry {
    pub attempts: u32,
    pub first_delay: Duration,
    pub max_delay: Duration,
}

impl Default for PingRetry {
    fn default() -> Self {
        Self {
            attempts: 8,
            first_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

/// Build a client for `database_name` and return once it answers a ping.
pub(super) async fn open_database(
    options: &ClientOptions,
    database_name: &str,
    retry: PingRetry,
) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(database_name);

    let attempts = retry.attempts.max(1);
    let mut delay = retry.first_delay;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => {
                info!(database = database_name, attempt, "MongoDB answered ping");
                return Ok((client, database));
            }
            Err(source) if attempt >= attempts => {
                return Err(MongoDaoError::InitialPing { attempts, source });
            }
            Err(err) => {
                debug!(database = database_name, attempt, error = %err, "MongoDB ping failed; retrying");
                sleep(delay).await;
                delay = (delay * 2).min(retry.max_delay);
            }
        }
    }
}
