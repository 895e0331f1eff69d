//! Kafka Commands

use anyhow::{bail, Result};
use clap::Subcommand;
use serde::Serialize;
use serde_json::Value;

use niffler_common::Settings;
use niffler_e2e::kafka::Delivery;
use niffler_e2e::{KafkaBus, KafkaClient, Matcher, Record};

use super::with_timeout;
use crate::output::{print_info, print_item, print_list, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum KafkaCommands {
    /// List topics visible to the consumer
    Topics,

    /// Wait for the next new message on a topic
    Watch {
        /// Topic to watch
        #[arg(short, long)]
        topic: String,

        /// Top-level JSON field to match
        #[arg(long, requires = "equals")]
        field: Option<String>,

        /// Expected value (parsed as JSON, falling back to a string)
        #[arg(long, requires = "field")]
        equals: Option<String>,

        /// Timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Publish a registration event the way niffler-auth does
    SendUser {
        /// Target topic
        #[arg(short, long, default_value = "users")]
        topic: String,

        /// Username to publish
        #[arg(short, long)]
        username: String,
    },
}

#[derive(Serialize)]
pub struct TopicDisplay {
    pub name: String,
}

impl TableDisplay for TopicDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Topic"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.name.clone()]
    }
}

#[derive(Serialize)]
pub struct RecordDisplay {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Value,
}

impl From<&Record> for RecordDisplay {
    fn from(record: &Record) -> Self {
        let payload = record.json().unwrap_or_else(|_| {
            let raw = record.payload.as_deref().unwrap_or_default();
            Value::String(String::from_utf8_lossy(raw).into_owned())
        });
        Self {
            topic: record.topic.clone(),
            partition: record.partition,
            offset: record.offset,
            key: record
                .key
                .as_deref()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            payload,
        }
    }
}

impl TableDisplay for RecordDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Topic", "Partition", "Offset", "Key", "Payload"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.topic.clone(),
            self.partition.to_string(),
            self.offset.to_string(),
            self.key.clone().unwrap_or_else(|| "-".to_string()),
            self.payload.to_string(),
        ]
    }
}

#[derive(Serialize)]
pub struct DeliveryDisplay {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl TableDisplay for DeliveryDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Topic", "Partition", "Offset"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.topic.clone(),
            self.partition.to_string(),
            self.offset.to_string(),
        ]
    }
}

/// Build the matcher for `--field/--equals`
pub fn matcher(field: Option<&str>, equals: Option<&str>) -> Result<Matcher> {
    match (field, equals) {
        (None, None) => Ok(Matcher::any()),
        (Some(field), Some(raw)) => {
            let expected =
                serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            Ok(Matcher::field_eq(field, expected))
        }
        _ => bail!("--field and --equals must be given together"),
    }
}

pub async fn execute(cmd: KafkaCommands, settings: &Settings, format: OutputFormat) -> Result<()> {
    let kafka = settings.kafka.with_unique_group();
    let client = KafkaClient::new(KafkaBus::connect(&kafka)?, kafka);

    match cmd {
        KafkaCommands::Topics => {
            let mut names = client.topic_names().await?;
            names.sort();
            let topics: Vec<TopicDisplay> = names
                .into_iter()
                .map(|name| TopicDisplay { name })
                .collect();
            print_list(&topics, format);
        }

        KafkaCommands::Watch {
            topic,
            field,
            equals,
            timeout,
        } => {
            let matcher = matcher(field.as_deref(), equals.as_deref())?;
            let wait = with_timeout(settings.waits.kafka(), timeout);

            let anchors = client.anchor(&topic).await?;
            print_info(&format!(
                "Waiting up to {:?} for {} after {}",
                wait.timeout,
                matcher.description(),
                anchors
            ));

            let record = client.await_new_message(anchors, &matcher, wait).await?;
            print_item(&RecordDisplay::from(&record), format);
        }

        KafkaCommands::SendUser { topic, username } => {
            let Delivery { partition, offset } = client.send_user_event(&topic, &username).await?;
            print_item(
                &DeliveryDisplay {
                    topic,
                    partition,
                    offset,
                },
                format,
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test_case("alice", json!({"username": "alice"}) ; "plain string")]
    #[test_case("42", json!({"username": 42}) ; "json number")]
    #[test_case("\"42\"", json!({"username": "42"}) ; "quoted string")]
    fn test_equals_value_parsing(raw: &str, payload: Value) {
        let matcher = matcher(Some("username"), Some(raw)).unwrap();
        assert!(matcher.matches(&payload));
    }

    #[test]
    fn test_half_filter_rejected() {
        assert!(matcher(Some("username"), None).is_err());
        assert!(matcher(None, None).unwrap().matches(&json!({})));
    }

    #[test]
    fn test_record_display_falls_back_to_text() {
        let record = Record {
            topic: "users".to_string(),
            partition: 0,
            offset: 3,
            key: Some(b"k".to_vec()),
            payload: Some(b"not a json".to_vec()),
            headers: vec![],
        };
        let display = RecordDisplay::from(&record);
        assert_eq!(display.payload, json!("not a json"));
        assert_eq!(display.row()[3], "k");
    }
}
