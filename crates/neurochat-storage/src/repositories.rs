// Repository layer for database operations

use anyhow::Result;
use neurochat_core::message::ChatMessage;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::models::*;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create database connection from URL
    pub async fn from_url(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ============================================
    // Threads
    // ============================================

    pub async fn create_thread(&self, input: CreateThread) -> Result<ThreadRow> {
        let row = sqlx::query_as::<_, ThreadRow>(
            r#"
            INSERT INTO threads (id, user_id, vlab_id, project_id, title, creation_date, update_date)
            VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
            RETURNING id, user_id, vlab_id, project_id, title, creation_date, update_date
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.user_id)
        .bind(input.vlab_id)
        .bind(input.project_id)
        .bind(&input.title)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    /// Thread scoped to its owner; authorization treats "not yours" and
    /// "does not exist" identically
    pub async fn get_thread_for_user(
        &self,
        user_id: Uuid,
        thread_id: Uuid,
    ) -> Result<Option<ThreadRow>> {
        let row = sqlx::query_as::<_, ThreadRow>(
            r#"
            SELECT id, user_id, vlab_id, project_id, title, creation_date, update_date
            FROM threads
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(thread_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_threads(&self, input: ListThreads) -> Result<Vec<ThreadRow>> {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT id, user_id, vlab_id, project_id, title, creation_date, update_date \
             FROM threads WHERE user_id = ",
        );
        query.push_bind(input.user_id);

        match input.vlab_id {
            Some(vlab_id) => {
                query.push(" AND vlab_id = ").push_bind(vlab_id);
            }
            None => {
                query.push(" AND vlab_id IS NULL");
            }
        }
        match input.project_id {
            Some(project_id) => {
                query.push(" AND project_id = ").push_bind(project_id);
            }
            None => {
                query.push(" AND project_id IS NULL");
            }
        }

        if input.exclude_empty {
            query.push(" AND EXISTS (SELECT 1 FROM messages WHERE messages.thread_id = threads.id)");
        }
        if let Some(lte) = input.creation_date_lte {
            query.push(" AND creation_date <= ").push_bind(lte);
        }
        if let Some(gte) = input.creation_date_gte {
            query.push(" AND creation_date >= ").push_bind(gte);
        }

        let column = input.sort.as_sql();
        if let Some(cursor) = input.cursor {
            query.push(format!(" AND {column} "));
            query.push(if input.descending { "< " } else { "> " });
            query.push_bind(cursor);
        }

        query.push(format!(
            " ORDER BY {column} {} LIMIT ",
            if input.descending { "DESC" } else { "ASC" }
        ));
        query.push_bind(input.limit);

        let rows = query.build_query_as::<ThreadRow>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    pub async fn update_thread_title(
        &self,
        thread_id: Uuid,
        title: &str,
    ) -> Result<Option<ThreadRow>> {
        let row = sqlx::query_as::<_, ThreadRow>(
            r#"
            UPDATE threads
            SET title = $2, update_date = NOW()
            WHERE id = $1
            RETURNING id, user_id, vlab_id, project_id, title, creation_date, update_date
            "#,
        )
        .bind(thread_id)
        .bind(title)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Cascade delete of a thread and everything hanging off it.
    ///
    /// The storage-side purge of external objects runs after this commits;
    /// the two halves are intentionally non-atomic.
    pub async fn delete_thread(&self, thread_id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM parts WHERE message_id IN (SELECT id FROM messages WHERE thread_id = $1)",
        )
        .bind(thread_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM token_consumption WHERE message_id IN (SELECT id FROM messages WHERE thread_id = $1)",
        )
        .bind(thread_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM tool_selection WHERE message_id IN (SELECT id FROM messages WHERE thread_id = $1)",
        )
        .bind(thread_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM messages WHERE thread_id = $1")
            .bind(thread_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM threads WHERE id = $1")
            .bind(thread_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    // ============================================
    // Messages and parts
    // ============================================

    pub async fn list_messages(
        &self,
        thread_id: Uuid,
        input: ListMessages,
    ) -> Result<Vec<MessageRow>> {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT id, thread_id, entity, creation_date FROM messages WHERE thread_id = ",
        );
        query.push_bind(thread_id);

        if !input.entities.is_empty() {
            query.push(" AND entity = ANY(").push_bind(input.entities).push(")");
        }
        if let Some(cursor) = input.cursor {
            query.push(" AND creation_date ");
            query.push(if input.descending { "< " } else { "> " });
            query.push_bind(cursor);
        }

        query.push(format!(
            " ORDER BY creation_date {}",
            if input.descending { "DESC" } else { "ASC" }
        ));
        if input.limit > 0 {
            query.push(" LIMIT ").push_bind(input.limit);
        }

        let rows = query.build_query_as::<MessageRow>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    pub async fn last_message(&self, thread_id: Uuid) -> Result<Option<MessageRow>> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, thread_id, entity, creation_date
            FROM messages
            WHERE thread_id = $1
            ORDER BY creation_date DESC
            LIMIT 1
            "#,
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_parts(&self, message_ids: &[Uuid]) -> Result<Vec<PartRow>> {
        let rows = sqlx::query_as::<_, PartRow>(
            r#"
            SELECT id, message_id, order_index, part_type, payload, validated, creation_date
            FROM parts
            WHERE message_id = ANY($1)
            ORDER BY message_id, order_index
            "#,
        )
        .bind(message_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Load the whole thread as the in-memory conversation, oldest first
    pub async fn load_conversation(&self, thread_id: Uuid) -> Result<Vec<ChatMessage>> {
        let messages = self
            .list_messages(thread_id, ListMessages::default())
            .await?;
        let ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();
        let parts = self.list_parts(&ids).await?;

        Ok(messages
            .iter()
            .map(|message| {
                let message_parts: Vec<PartRow> = parts
                    .iter()
                    .filter(|p| p.message_id == message.id)
                    .cloned()
                    .collect();
                message_from_rows(message, &message_parts)
            })
            .collect())
    }

    /// Persist the conversation after a stream ends.
    ///
    /// Message rows are inserted if absent; parts are appended beyond each
    /// message's already-persisted count; in-memory ledger and selection rows
    /// are inserted as-is (loaded messages carry none, so nothing duplicates).
    pub async fn commit_conversation(&self, messages: &[ChatMessage]) -> Result<()> {
        let Some(first) = messages.first() else {
            return Ok(());
        };
        let mut tx = self.pool.begin().await?;

        for message in messages {
            sqlx::query(
                r#"
                INSERT INTO messages (id, thread_id, entity, creation_date)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(message.id)
            .bind(message.thread_id)
            .bind(message.role.as_str())
            .bind(message.created_at)
            .execute(&mut *tx)
            .await?;

            for part in message.parts.iter().skip(message.persisted_parts) {
                sqlx::query(
                    r#"
                    INSERT INTO parts (id, message_id, order_index, part_type, payload, validated, creation_date)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    "#,
                )
                .bind(part.id)
                .bind(message.id)
                .bind(part.order_index)
                .bind(part.part_type.as_str())
                .bind(&part.payload)
                .bind(part.validated)
                .bind(part.created_at)
                .execute(&mut *tx)
                .await?;
            }

            for record in &message.token_consumption {
                sqlx::query(
                    r#"
                    INSERT INTO token_consumption (id, message_id, token_type, task, count, model)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(Uuid::now_v7())
                .bind(message.id)
                .bind(record.token_type.as_str())
                .bind(record.task.as_str())
                .bind(record.count)
                .bind(&record.model)
                .execute(&mut *tx)
                .await?;
            }

            for tool_name in &message.tool_selection {
                sqlx::query(
                    r#"
                    INSERT INTO tool_selection (id, message_id, tool_name)
                    VALUES ($1, $2, $3)
                    "#,
                )
                .bind(Uuid::now_v7())
                .bind(message.id)
                .bind(tool_name)
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query("UPDATE threads SET update_date = NOW() WHERE id = $1")
            .bind(first.thread_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::debug!(thread_id = %first.thread_id, count = messages.len(), "Committed conversation");
        Ok(())
    }

    /// FUNCTION_CALL part matching a call id within a thread's messages
    pub async fn get_function_call_part(
        &self,
        thread_id: Uuid,
        call_id: &str,
    ) -> Result<Option<PartRow>> {
        let row = sqlx::query_as::<_, PartRow>(
            r#"
            SELECT p.id, p.message_id, p.order_index, p.part_type, p.payload, p.validated, p.creation_date
            FROM parts p
            JOIN messages m ON m.id = p.message_id
            WHERE m.thread_id = $1
              AND p.part_type = 'function_call'
              AND p.payload->>'call_id' = $2
            "#,
        )
        .bind(thread_id)
        .bind(call_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Flip the HIL validation flag on a FUNCTION_CALL part, optionally
    /// replacing its arguments
    pub async fn set_part_validated(
        &self,
        part_id: Uuid,
        validated: bool,
        arguments: Option<&str>,
    ) -> Result<()> {
        match arguments {
            Some(arguments) => {
                sqlx::query(
                    r#"
                    UPDATE parts
                    SET validated = $2,
                        payload = jsonb_set(payload, '{arguments}', to_jsonb($3::text))
                    WHERE id = $1
                    "#,
                )
                .bind(part_id)
                .bind(validated)
                .bind(arguments)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query("UPDATE parts SET validated = $2 WHERE id = $1")
                    .bind(part_id)
                    .bind(validated)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    /// Append a part at the end of a message (used when a validated HIL tool
    /// call gets its output outside the agent loop)
    pub async fn append_part(
        &self,
        message_id: Uuid,
        part_type: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO parts (id, message_id, order_index, part_type, payload, validated, creation_date)
            SELECT $1, $2, COALESCE(MAX(order_index) + 1, 0), $3, $4, NULL, NOW()
            FROM parts WHERE message_id = $2
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(message_id)
        .bind(part_type)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ============================================
    // Ledgers
    // ============================================

    pub async fn tool_selection_for_message(&self, message_id: Uuid) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, ToolSelectionRow>(
            "SELECT id, message_id, tool_name FROM tool_selection WHERE message_id = $1",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.tool_name).collect())
    }

    pub async fn token_consumption_for_message(
        &self,
        message_id: Uuid,
    ) -> Result<Vec<TokenConsumptionRow>> {
        let rows = sqlx::query_as::<_, TokenConsumptionRow>(
            r#"
            SELECT id, message_id, token_type, task, count, model
            FROM token_consumption
            WHERE message_id = $1
            "#,
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // ============================================
    // Search
    // ============================================

    /// Full-text search over message contents; one hit per thread, the
    /// top-ranked message of each
    pub async fn search_messages(
        &self,
        user_id: Uuid,
        vlab_id: Option<Uuid>,
        project_id: Option<Uuid>,
        query: &str,
        limit: i64,
    ) -> Result<Vec<SearchHitRow>> {
        let rows = sqlx::query_as::<_, SearchHitRow>(
            r#"
            SELECT DISTINCT ON (m.thread_id) m.thread_id, m.id AS message_id, t.title
            FROM messages m
            JOIN threads t ON t.id = m.thread_id
            WHERE t.user_id = $1
              AND t.vlab_id IS NOT DISTINCT FROM $2
              AND t.project_id IS NOT DISTINCT FROM $3
              AND m.search_vector @@ plainto_tsquery('english', $4)
            ORDER BY m.thread_id,
                     ts_rank(m.search_vector, plainto_tsquery('english', $4)) DESC,
                     m.creation_date DESC
            LIMIT $5
            "#,
        )
        .bind(user_id)
        .bind(vlab_id)
        .bind(project_id)
        .bind(query)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
