/// DynamoDBでトリガーを管理するためのトリガーリポジトリ
///
/// テーブルはパーティションキー`id`（S）のみ。dueは`due_at`（N、Unix秒）で保持し、
/// スイープでは`due_at <= :now`のフィルター付きScanをページ単位で読む。
use async_trait::async_trait;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

use crate::domain::{Trigger, TriggerId};

/// リポジトリ操作のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    /// DynamoDBからの読み取りに失敗
    #[error("Read error: {0}")]
    ReadError(String),

    /// DynamoDBへの書き込みに失敗
    #[error("Write error: {0}")]
    WriteError(String),

    /// 条件付き書き込みが競合した（同時更新、IDの重複）
    #[error("Conflicting write for trigger {0}")]
    Conflict(String),

    /// 保存データの変換に失敗
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// due範囲クエリの継続位置（最後に評価したトリガーID）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueCursor(String);

impl DueCursor {
    pub fn new(last_id: impl Into<String>) -> Self {
        Self(last_id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// due範囲クエリの1ページ分の結果
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DuePage {
    /// このページで見つかったdue済みトリガー（空のページもありうる）
    pub triggers: Vec<Trigger>,
    /// 続きがある場合の継続位置。`None`なら列挙完了
    pub next_cursor: Option<DueCursor>,
}

/// トリガー永続化用トレイト
///
/// 実際のDynamoDBとテスト用モックを差し替えられるようにする。
/// チェックインの読み取り→書き込みは`replace`の楽観的条件で直列化する。
#[async_trait]
pub trait TriggerRepository: Send + Sync {
    /// IDでトリガーを取得（存在しなければ`Ok(None)`）
    async fn get(&self, id: TriggerId) -> Result<Option<Trigger>, StoreError>;

    /// 新しいトリガーを保存
    ///
    /// 同じIDが既に存在する場合は`Err(StoreError::Conflict)`
    async fn insert(&self, trigger: &Trigger) -> Result<(), StoreError>;

    /// 既存トリガーを上書き
    ///
    /// 保存済みのチェックイン数が`expected_checkins`と一致する場合のみ書き込む。
    /// 一致しない（他の書き込みが先行した、または削除済み）場合は
    /// `Err(StoreError::Conflict)`
    async fn replace(&self, trigger: &Trigger, expected_checkins: usize)
    -> Result<(), StoreError>;

    /// トリガーを削除
    ///
    /// 削除したレコードが存在した場合は`Ok(true)`、存在しなかった場合は`Ok(false)`
    async fn delete(&self, id: TriggerId) -> Result<bool, StoreError>;

    /// `due_at <= now`のトリガーを1ページ分取得
    async fn find_due(
        &self,
        now: DateTime<Utc>,
        cursor: Option<DueCursor>,
    ) -> Result<DuePage, StoreError>;
}

/// TriggerRepositoryのDynamoDB実装
#[derive(Debug, Clone)]
pub struct DynamoTriggerRepository {
    /// DynamoDBクライアント
    client: DynamoDbClient,
    /// トリガーテーブル名
    table_name: String,
}

impl DynamoTriggerRepository {
    /// 新しいDynamoTriggerRepositoryを作成
    pub fn new(client: DynamoDbClient, table_name: String) -> Self {
        Self { client, table_name }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn client(&self) -> &DynamoDbClient {
        &self.client
    }

    /// トリガーをDynamoDBアイテムに変換
    fn to_item(trigger: &Trigger) -> HashMap<String, AttributeValue> {
        let checkins = trigger
            .checkins()
            .iter()
            .map(|t| AttributeValue::N(t.timestamp().to_string()))
            .collect();

        HashMap::from([
            ("id".to_string(), AttributeValue::S(trigger.id().to_string())),
            (
                "due_at".to_string(),
                AttributeValue::N(trigger.due_at().timestamp().to_string()),
            ),
            (
                "hours_between_fire".to_string(),
                AttributeValue::N(trigger.hours_between_fire().to_string()),
            ),
            ("checkins".to_string(), AttributeValue::L(checkins)),
            (
                "fire_url".to_string(),
                AttributeValue::S(trigger.fire_url().to_string()),
            ),
            (
                "fire_payload".to_string(),
                AttributeValue::S(trigger.fire_payload().to_string()),
            ),
        ])
    }

    /// DynamoDBアイテムからトリガーを復元
    fn from_item(item: &HashMap<String, AttributeValue>) -> Result<Trigger, StoreError> {
        let id = Self::string_field(item, "id")?
            .parse::<TriggerId>()
            .map_err(|e| StoreError::SerializationError(format!("Invalid id field: {e}")))?;

        let due_at = Self::timestamp(Self::number_field(item, "due_at")?, "due_at")?;

        let hours_between_fire = Self::number_field(item, "hours_between_fire")?
            .parse::<u32>()
            .map_err(|_| {
                StoreError::SerializationError("Invalid hours_between_fire field".to_string())
            })?;

        let checkins = item
            .get("checkins")
            .and_then(|v| v.as_l().ok())
            .ok_or_else(|| StoreError::SerializationError("Missing checkins field".to_string()))?
            .iter()
            .map(|v| {
                v.as_n()
                    .map_err(|_| {
                        StoreError::SerializationError("Invalid checkins element".to_string())
                    })
                    .and_then(|n| Self::timestamp(n, "checkins"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let fire_url = Self::string_field(item, "fire_url")?.to_string();
        // 空文字列のペイロードも正当な値
        let fire_payload = item
            .get("fire_payload")
            .and_then(|v| v.as_s().ok())
            .cloned()
            .unwrap_or_default();

        Ok(Trigger::from_parts(
            id,
            due_at,
            hours_between_fire,
            checkins,
            fire_url,
            fire_payload,
        ))
    }

    fn string_field<'a>(
        item: &'a HashMap<String, AttributeValue>,
        name: &str,
    ) -> Result<&'a str, StoreError> {
        item.get(name)
            .and_then(|v| v.as_s().ok())
            .map(String::as_str)
            .ok_or_else(|| StoreError::SerializationError(format!("Missing {name} field")))
    }

    fn number_field<'a>(
        item: &'a HashMap<String, AttributeValue>,
        name: &str,
    ) -> Result<&'a str, StoreError> {
        item.get(name)
            .and_then(|v| v.as_n().ok())
            .map(String::as_str)
            .ok_or_else(|| StoreError::SerializationError(format!("Missing {name} field")))
    }

    /// Unix秒の文字列をUTC日時に変換
    fn timestamp(value: &str, name: &str) -> Result<DateTime<Utc>, StoreError> {
        value
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| StoreError::SerializationError(format!("Invalid {name} field")))
    }
}

#[async_trait]
impl TriggerRepository for DynamoTriggerRepository {
    async fn get(&self, id: TriggerId) -> Result<Option<Trigger>, StoreError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("id", AttributeValue::S(id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| StoreError::ReadError(e.to_string()))?;

        result.item.as_ref().map(Self::from_item).transpose()
    }

    async fn insert(&self, trigger: &Trigger) -> Result<(), StoreError> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(Self::to_item(trigger)))
            .condition_expression("attribute_not_exists(id)")
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_conditional_check_failed_exception() {
                    StoreError::Conflict(trigger.id().to_string())
                } else {
                    StoreError::WriteError(service_error.to_string())
                }
            })?;

        Ok(())
    }

    async fn replace(
        &self,
        trigger: &Trigger,
        expected_checkins: usize,
    ) -> Result<(), StoreError> {
        // チェックインは追記のみなので、件数がバージョン番号の役割を果たす
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(Self::to_item(trigger)))
            .condition_expression("size(checkins) = :expected")
            .expression_attribute_values(
                ":expected",
                AttributeValue::N(expected_checkins.to_string()),
            )
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_conditional_check_failed_exception() {
                    StoreError::Conflict(trigger.id().to_string())
                } else {
                    StoreError::WriteError(service_error.to_string())
                }
            })?;

        Ok(())
    }

    async fn delete(&self, id: TriggerId) -> Result<bool, StoreError> {
        let result = self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .key("id", AttributeValue::S(id.to_string()))
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .map_err(|e| StoreError::WriteError(e.to_string()))?;

        Ok(result.attributes.is_some_and(|old| !old.is_empty()))
    }

    async fn find_due(
        &self,
        now: DateTime<Utc>,
        cursor: Option<DueCursor>,
    ) -> Result<DuePage, StoreError> {
        let mut scan = self
            .client
            .scan()
            .table_name(&self.table_name)
            .filter_expression("due_at <= :now")
            .expression_attribute_values(":now", AttributeValue::N(now.timestamp().to_string()))
            .consistent_read(true);

        if let Some(cursor) = cursor {
            scan = scan.exclusive_start_key("id", AttributeValue::S(cursor.0));
        }

        let response = scan
            .send()
            .await
            .map_err(|e| StoreError::ReadError(e.to_string()))?;

        let next_cursor = response
            .last_evaluated_key
            .as_ref()
            .and_then(|key| key.get("id"))
            .and_then(|v| v.as_s().ok())
            .map(|id| DueCursor(id.clone()));

        let triggers = response
            .items
            .unwrap_or_default()
            .iter()
            .map(Self::from_item)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(DuePage {
            triggers,
            next_cursor,
        })
    }
}
