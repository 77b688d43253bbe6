use std::collections::HashMap;

use fred::prelude::*;
use log::{error, info};
use once_cell::sync::OnceCell;

/// One entry read from a stream: its id and field map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    pub id: String,
    pub fields: HashMap<String, String>,
}

#[derive(Clone)]
pub struct RedisManager {
    client: RedisClient,
}

static INSTANCE: OnceCell<RedisManager> = OnceCell::new();

impl RedisManager {
    pub fn new(redis_url: &str) -> Result<Self, RedisError> {
        let config = RedisConfig::from_url(redis_url)?;
        let client = RedisClient::new(config, None, None, None);
        Ok(Self { client })
    }

    pub fn init_global(redis_url: &str) -> Result<&'static RedisManager, RedisError> {
        INSTANCE.get_or_try_init(|| Self::new(redis_url))
    }

    pub fn global() -> Option<&'static RedisManager> {
        INSTANCE.get()
    }

    pub fn client(&self) -> RedisClient {
        self.client.clone()
    }

    pub async fn connect(&self) -> Result<(), RedisError> {
        self.client.connect();
        self.client.wait_for_connect().await?;
        info!("Connected to Redis");
        Ok(())
    }

    pub async fn stream_add(&self, stream: &str, pairs: &[(&str, &str)]) -> Result<(), RedisError> {
        let fields: Vec<(String, String)> = pairs
            .iter()
            .map(|(field, value)| ((*field).to_owned(), (*value).to_owned()))
            .collect();

        self.client
            .xadd::<(), _, _, _, _>(stream, false, None, "*", fields)
            .await
    }

    /// Reads up to `count` entries after `last_id` and advances it past what was read.
    pub async fn read_stream(
        &self,
        stream: &str,
        last_id: &mut String,
        count: u64,
    ) -> Result<Vec<StreamMessage>, RedisError> {
        let raw: RedisValue = self
            .client
            .xread::<RedisValue, _, _>(Some(count), None, vec![stream], vec![last_id.as_str()])
            .await
            .map_err(|e| {
                error!("XREAD error on {}: {}", stream, e);
                e
            })?;

        let messages = parse_xread(raw);
        if let Some(last) = messages.last() {
            *last_id = last.id.clone();
        }
        Ok(messages)
    }
}

fn as_string(value: &RedisValue) -> String {
    value.as_str().map(|s| s.to_string()).unwrap_or_default()
}

/// Flattens an XREAD reply (`[[stream, [[id, [k, v, ...]], ...]], ...]`) into messages.
pub fn parse_xread(raw: RedisValue) -> Vec<StreamMessage> {
    let RedisValue::Array(streams) = raw else {
        return Vec::new();
    };

    let mut messages = Vec::new();
    for stream_entry in streams {
        let RedisValue::Array(stream_data) = stream_entry else { continue };
        let Some(RedisValue::Array(entries)) = stream_data.get(1) else { continue };

        for entry in entries {
            let RedisValue::Array(entry_data) = entry else { continue };
            let (Some(id), Some(RedisValue::Array(pairs))) = (entry_data.first(), entry_data.get(1)) else {
                continue;
            };
            let id = as_string(id);
            if id.is_empty() {
                continue;
            }

            let fields = pairs
                .chunks_exact(2)
                .map(|pair| (as_string(&pair[0]), as_string(&pair[1])))
                .collect();
            messages.push(StreamMessage { id, fields });
        }
    }
    messages
}
