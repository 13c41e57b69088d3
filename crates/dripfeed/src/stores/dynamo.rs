//! 📡 The DynamoDB-wire store — HTTP, headers, and hope.
//!
//! 🎬 *[a POST request approaches the endpoint. it is carrying 25
//! items and a header that says X-Amz-Target. the endpoint squints.]*
//!
//! Speaks the DynamoDB JSON 1.0 protocol: every operation is a POST to
//! the endpoint root with an `X-Amz-Target` header naming the op and a
//! JSON body carrying the rest. Pointed at DynamoDB-compatible
//! endpoints — DynamoDB Local, LocalStack, Alternator — which accept
//! static-credential auth headers without the full SigV4 ceremony.
//! Real AWS SigV4 signing is credential plumbing owned by whatever
//! constructs the connection parameters, not by the loader core.
//!
//! 🧠 Knowledge graph:
//! - **One client, built once**: connect/read timeouts set at startup,
//!   handle shared across every concurrent write. reqwest pools the
//!   connections; we pool the anxiety.
//! - **Partial vs hard failure**: `UnprocessedItems` in a 2xx reply is
//!   a partial failure and comes back as data. A non-2xx status is a
//!   hard error and comes back as an `Err` with the body attached,
//!   because the body is where the store hides its reasons.
//!
//! 🦆 (the duck read the protocol docs so you don't have to)

use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::app_config::StoreConfig;
use crate::portion::BATCH_MAX_ITEMS;
use crate::record::Record;
use crate::stores::TableInfo;

/// 🔖 Protocol version prefix for the `X-Amz-Target` header. The date
/// is part of the wire contract, not a comment on our delivery speed.
const TARGET_PREFIX: &str = "DynamoDB_20120810";

/// 📡 A DynamoDB-wire store client. Cheap to share, expensive to
/// disappoint.
#[derive(Debug)]
pub(crate) struct DynamoStore {
    client: reqwest::Client,
    config: StoreConfig,
}

impl DynamoStore {
    /// 🚀 Build the HTTP client and wrap it around the endpoint config.
    ///
    /// 10s connect timeout: if the endpoint can't even shake hands in
    /// ten seconds, it is not having a good day and neither are we.
    /// 30s request timeout: batch writes can be meaty, we're patient
    /// but not infinitely so.
    pub(crate) fn new(config: &StoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .context("💀 The HTTP client refused to be born. Probably a missing TLS cert or a cursed system OpenSSL. Either way: tragic.")?;

        Ok(Self { client, config: config.clone() })
    }

    /// 📏 DescribeTable → the provisioned write quota, or a hard error
    /// when the table is missing. A loader with no table is a very
    /// elaborate way to read a file.
    pub(crate) async fn describe_table(&self, table: &str) -> Result<TableInfo> {
        let reply = self
            .call("DescribeTable", json!({ "TableName": table }))
            .await
            .with_context(|| {
                format!(
                    "💀 DescribeTable('{}') failed. Either the table does not exist, \
                     the endpoint is wrong, or the credentials opened the door to an \
                     empty room. The restore cannot start without a quota.",
                    table
                )
            })?;

        let quota = reply["Table"]["ProvisionedThroughput"]["WriteCapacityUnits"]
            .as_u64()
            .with_context(|| {
                format!(
                    "💀 Table '{}' was described, but the description is missing \
                     Table.ProvisionedThroughput.WriteCapacityUnits. A table with \
                     no write quota cannot be paced against.",
                    table
                )
            })?;

        Ok(TableInfo { write_capacity_units: quota })
    }

    /// 📥 PutItem — one record, atomically. Binary attributes go over
    /// the wire re-encoded as base64 by [`Record::to_wire`].
    pub(crate) async fn put_item(&self, table: &str, record: &Record) -> Result<()> {
        self.call("PutItem", json!({ "TableName": table, "Item": record.to_wire() }))
            .await
            .context("💀 PutItem rejected the record. This is a hard error, not throttling — throttled puts come back as errors too, but with a ProvisionedThroughputExceededException in the body. Read the body.")?;
        Ok(())
    }

    /// 📦 BatchWriteItem — up to 25 records in one request. The reply's
    /// `UnprocessedItems` come back decoded as [`Record`]s, ready for
    /// resubmission. That retry loop lives in the executor, not here —
    /// this function sends exactly one request, every time.
    pub(crate) async fn batch_write(&self, table: &str, records: &[Record]) -> Result<Vec<Record>> {
        if records.is_empty() {
            bail!("💀 batch_write called with zero records. Nobody dispatches an empty portion. How did you get here?");
        }
        if records.len() > BATCH_MAX_ITEMS {
            bail!(
                "💀 batch_write called with {} records; the API caps a request at {}. \
                 The executor chunks portions before calling — this is a bug upstream.",
                records.len(),
                BATCH_MAX_ITEMS
            );
        }

        let put_requests: Vec<Value> = records
            .iter()
            .map(|record| json!({ "PutRequest": { "Item": record.to_wire() } }))
            .collect();
        let mut request_items = serde_json::Map::new();
        request_items.insert(table.to_string(), Value::Array(put_requests));

        let reply = self
            .call("BatchWriteItem", json!({ "RequestItems": request_items }))
            .await
            .context("💀 BatchWriteItem failed outright — not a partial failure, a full one. The whole request bounced.")?;

        // 🔄 Partial failure comes back as data: the items the store
        // couldn't take this second, tagged for resubmission.
        let unprocessed = match reply["UnprocessedItems"][table].as_array() {
            None => Vec::new(),
            Some(entries) => entries
                .iter()
                .map(|entry| {
                    entry["PutRequest"]["Item"]
                        .as_object()
                        .context("💀 UnprocessedItems entry without a PutRequest.Item. The store returned a shape we do not recognize, and we refuse to guess which records it meant.")
                        .and_then(Record::from_wire)
                })
                .collect::<Result<Vec<_>>>()?,
        };

        if !unprocessed.is_empty() {
            debug!(
                "🔁 store bounced {} of {} items (throughput) — queued for resubmission",
                unprocessed.len(),
                records.len()
            );
        }
        Ok(unprocessed)
    }

    /// 📡 One protocol call: POST to the endpoint root, op name in the
    /// `X-Amz-Target` header, JSON 1.0 body. Non-2xx → hard error with
    /// the body attached, because "400 Bad Request" alone has never
    /// helped anyone at 3am.
    async fn call(&self, target: &str, body: Value) -> Result<Value> {
        trace!("📡 {} → {}", target, self.config.endpoint);

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header("Content-Type", "application/x-amz-json-1.0")
            .header("X-Amz-Target", format!("{}.{}", TARGET_PREFIX, target))
            .body(body.to_string());

        // 🔒 Static-credential header, the local-endpoint dialect:
        // compatible servers only read the Credential= scope out of
        // this, they do not verify the signature. Real SigV4 belongs
        // to the credential glue that configured us.
        if let Some(ref access_key) = self.config.access_key {
            request = request.header(
                "Authorization",
                format!(
                    "AWS4-HMAC-SHA256 Credential={}/19700101/{}/dynamodb/aws4_request, \
                     SignedHeaders=host;x-amz-target, Signature=unsigned",
                    access_key, self.config.region
                ),
            );
        }

        let response = request
            .send()
            .await
            .context("💀 The request never reached the store. We launched it into the network and the network said 'not vibing with it.' Check the endpoint, check connectivity, check your feelings.")?;

        let status = response.status();
        let text = response
            .text()
            .await
            .context("💀 The store replied, then the body evaporated mid-read. Connection dropped while streaming the response.")?;

        if !status.is_success() {
            // 💀 We got a response! It just... wasn't good news.
            bail!(
                "💀 The store answered '{}' with status {}. The body read: '{}'. \
                 Hard error — the run stops here.",
                target,
                status,
                text
            );
        }

        serde_json::from_str(&text).with_context(|| {
            format!("💀 The store's 2xx reply to '{}' was not valid JSON. A success we cannot parse is still a failure.", target)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::decode_line;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store_for(server: &MockServer) -> DynamoStore {
        let config = StoreConfig {
            endpoint: server.uri(),
            region: "us-east-1".into(),
            access_key: Some("AKTEST".into()),
            secret_key: Some("shh".into()),
        };
        DynamoStore::new(&config).expect("client builds")
    }

    #[tokio::test]
    async fn the_one_where_describe_table_finds_the_quota() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("X-Amz-Target", "DynamoDB_20120810.DescribeTable"))
            .and(body_partial_json(json!({ "TableName": "saves" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Table": { "ProvisionedThroughput": { "WriteCapacityUnits": 50 } }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let info = store_for(&server).describe_table("saves").await?;
        assert_eq!(info.write_capacity_units, 50);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_missing_table_is_a_hard_stop() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "__type": "com.amazonaws.dynamodb.v20120810#ResourceNotFoundException"
            })))
            .mount(&server)
            .await;

        let err = store_for(&server).describe_table("ghost-table").await.unwrap_err();
        let chain = format!("{:#}", err);
        assert!(chain.contains("ghost-table"), "Error names the table: {chain}");
        assert!(chain.contains("ResourceNotFound"), "Error carries the body: {chain}");
    }

    #[tokio::test]
    async fn the_one_where_put_item_ships_base64_binary() -> Result<()> {
        // 🧪 Raw bytes in the Record must leave the building as base64.
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("X-Amz-Target", "DynamoDB_20120810.PutItem"))
            .and(body_partial_json(json!({
                "TableName": "saves",
                "Item": { "blob": { "B": "aGVsbG8=" }, "id": { "S": "1" } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let record = decode_line(r#"{"id":{"S":"1"},"blob":{"B":"aGVsbG8="}}"#)?;
        store_for(&server).put_item("saves", &record).await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_unprocessed_items_come_back_as_records() -> Result<()> {
        // 🧪 Partial failure is data, not an error: the bounced item
        // must round-trip back into a Record we can resubmit.
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("X-Amz-Target", "DynamoDB_20120810.BatchWriteItem"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "UnprocessedItems": {
                    "saves": [
                        { "PutRequest": { "Item": { "id": { "S": "2" } } } }
                    ]
                }
            })))
            .mount(&server)
            .await;

        let records = vec![
            decode_line(r#"{"id":{"S":"1"}}"#)?,
            decode_line(r#"{"id":{"S":"2"}}"#)?,
        ];
        let unprocessed = store_for(&server).batch_write("saves", &records).await?;

        assert_eq!(unprocessed.len(), 1, "One item bounced");
        assert_eq!(unprocessed[0], records[1], "The bounced item is the same record, byte for byte");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_empty_unprocessed_map_means_peace() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "UnprocessedItems": {} })))
            .mount(&server)
            .await;

        let records = vec![decode_line(r#"{"id":{"S":"1"}}"#)?];
        let unprocessed = store_for(&server).batch_write("saves", &records).await?;
        assert!(unprocessed.is_empty(), "Everything landed on the first try. Savor it.");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_batch_write_refuses_26_items() -> Result<()> {
        // 🧪 Guard rail: the chunking bug upstream gets caught here,
        // loudly, instead of as a cryptic 400 from the store.
        let server = MockServer::start().await;
        let records: Vec<Record> = (0..26)
            .map(|i| decode_line(&format!(r#"{{"id":{{"N":"{i}"}}}}"#)).expect("decodes"))
            .collect();

        let err = store_for(&server).batch_write("saves", &records).await.unwrap_err();
        assert!(err.to_string().contains("26"), "Error states the offending count: {err}");
        Ok(())
    }
}
