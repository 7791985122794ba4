//! Postgres-backed [`Store`]. Every method is one transaction; the
//! admission race is closed by `insert_participant_if_room_not_full`'s
//! `SELECT ... FOR UPDATE` on the room row before the conditional insert.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use driftroom_core::{ApiError, Attachment, Message, MessageType, Participant, Role, Room, RoomStatus};
use rand::Rng;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::Store;

const ROOM_ID_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const ROOM_ID_LEN: usize = 4;
const CREATE_ROOM_MAX_ATTEMPTS: usize = 10;

/// A `Store` backed by a pooled Postgres connection.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects a pool to `database_url`. Does not run migrations; call
    /// [`PgStore::migrate`] once at startup.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::StorageFailure`] if the pool cannot be established.
    pub async fn connect(database_url: &str) -> Result<Self, ApiError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|err| ApiError::StorageFailure(format!("connect: {err}")))?;
        Ok(Self { pool })
    }

    /// Applies the crate's embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::StorageFailure`] if a migration fails to apply.
    pub async fn migrate(&self) -> Result<(), ApiError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| ApiError::StorageFailure(format!("migrate: {err}")))
    }
}

fn status_to_str(status: RoomStatus) -> &'static str {
    match status {
        RoomStatus::Pending => "pending",
        RoomStatus::Active => "active",
        RoomStatus::Locked => "locked",
        RoomStatus::Closed => "closed",
        RoomStatus::Archived => "archived",
    }
}

fn status_from_str(s: &str) -> Result<RoomStatus, ApiError> {
    match s {
        "pending" => Ok(RoomStatus::Pending),
        "active" => Ok(RoomStatus::Active),
        "locked" => Ok(RoomStatus::Locked),
        "closed" => Ok(RoomStatus::Closed),
        "archived" => Ok(RoomStatus::Archived),
        other => Err(ApiError::StorageFailure(format!(
            "unrecognized room status in database: {other}"
        ))),
    }
}

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::Host => "host",
        Role::Guest => "guest",
    }
}

fn role_from_str(s: &str) -> Result<Role, ApiError> {
    match s {
        "host" => Ok(Role::Host),
        "guest" => Ok(Role::Guest),
        other => Err(ApiError::StorageFailure(format!(
            "unrecognized role in database: {other}"
        ))),
    }
}

fn msg_type_to_str(msg_type: MessageType) -> &'static str {
    match msg_type {
        MessageType::Text => "text",
        MessageType::Image => "image",
    }
}

fn msg_type_from_str(s: &str) -> Result<MessageType, ApiError> {
    match s {
        "text" => Ok(MessageType::Text),
        "image" => Ok(MessageType::Image),
        other => Err(ApiError::StorageFailure(format!(
            "unrecognized message type in database: {other}"
        ))),
    }
}

fn room_from_row(row: &sqlx::postgres::PgRow) -> Result<Room, ApiError> {
    Ok(Room {
        room_id: row.try_get("room_id").map_err(sqlx_err)?,
        status: status_from_str(&row.try_get::<String, _>("status").map_err(sqlx_err)?)?,
        created_at: row.try_get("created_at").map_err(sqlx_err)?,
        accepted_at: row.try_get("accepted_at").map_err(sqlx_err)?,
        expires_at: row.try_get("expires_at").map_err(sqlx_err)?,
        closed_at: row.try_get("closed_at").map_err(sqlx_err)?,
        archive_key: row.try_get("archive_key").map_err(sqlx_err)?,
    })
}

fn participant_from_row(row: &sqlx::postgres::PgRow) -> Result<Participant, ApiError> {
    Ok(Participant {
        id: row.try_get("id").map_err(sqlx_err)?,
        room_id: row.try_get("room_id").map_err(sqlx_err)?,
        role: role_from_str(&row.try_get::<String, _>("role").map_err(sqlx_err)?)?,
        device_id: row.try_get("device_id").map_err(sqlx_err)?,
        display_name: row.try_get("display_name").map_err(sqlx_err)?,
        ip_address: row.try_get("ip_address").map_err(sqlx_err)?,
        joined_at: row.try_get("joined_at").map_err(sqlx_err)?,
    })
}

fn message_from_row(row: &sqlx::postgres::PgRow) -> Result<Message, ApiError> {
    Ok(Message {
        id: row.try_get("id").map_err(sqlx_err)?,
        room_id: row.try_get("room_id").map_err(sqlx_err)?,
        participant_id: row.try_get("participant_id").map_err(sqlx_err)?,
        created_at: row.try_get("created_at").map_err(sqlx_err)?,
        body_ct: row.try_get("body_ct").map_err(sqlx_err)?,
        nonce: row.try_get("nonce").map_err(sqlx_err)?,
        tag: row.try_get("tag").map_err(sqlx_err)?,
        msg_type: msg_type_from_str(&row.try_get::<String, _>("msg_type").map_err(sqlx_err)?)?,
        ip_address: row.try_get("ip_address").map_err(sqlx_err)?,
    })
}

fn attachment_from_row(row: &sqlx::postgres::PgRow) -> Result<Attachment, ApiError> {
    Ok(Attachment {
        id: row.try_get("id").map_err(sqlx_err)?,
        room_id: row.try_get("room_id").map_err(sqlx_err)?,
        object_key: row.try_get("object_key").map_err(sqlx_err)?,
        mime_type: row.try_get("mime_type").map_err(sqlx_err)?,
        size_bytes: row.try_get("size_bytes").map_err(sqlx_err)?,
        available: row.try_get("available").map_err(sqlx_err)?,
        message_id: row.try_get("message_id").map_err(sqlx_err)?,
    })
}

fn sqlx_err(err: sqlx::Error) -> ApiError {
    ApiError::StorageFailure(err.to_string())
}

fn generate_room_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ROOM_ID_LEN)
        .map(|_| ROOM_ID_ALPHABET[rng.gen_range(0..ROOM_ID_ALPHABET.len())] as char)
        .collect()
}

#[async_trait]
impl Store for PgStore {
    async fn create_room(&self, preferred_id: Option<String>) -> Result<Room, ApiError> {
        let ids_to_try: Vec<String> = match preferred_id {
            Some(id) => vec![id],
            None => (0..CREATE_ROOM_MAX_ATTEMPTS).map(|_| generate_room_id()).collect(),
        };

        for room_id in ids_to_try {
            let result = sqlx::query(
                "INSERT INTO rooms (room_id, status, created_at) VALUES ($1, 'pending', now()) \
                 RETURNING room_id, status, created_at, accepted_at, expires_at, closed_at, archive_key",
            )
            .bind(&room_id)
            .fetch_one(&self.pool)
            .await;

            match result {
                Ok(row) => return room_from_row(&row),
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => continue,
                Err(err) => return Err(sqlx_err(err)),
            }
        }

        Err(ApiError::CapacityExhausted(
            "failed to generate a unique room id after multiple attempts".to_owned(),
        ))
    }

    async fn get_room(&self, room_id: &str) -> Result<Option<Room>, ApiError> {
        let row = sqlx::query(
            "SELECT room_id, status, created_at, accepted_at, expires_at, closed_at, archive_key \
             FROM rooms WHERE room_id = $1",
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?;
        row.as_ref().map(room_from_row).transpose()
    }

    async fn accept_room(
        &self,
        room_id: &str,
        now: DateTime<Utc>,
        wrapped_room_key: Vec<u8>,
        host_device_id: Uuid,
        host_ip: Option<String>,
    ) -> Result<Option<(Room, Participant)>, ApiError> {
        let mut tx = self.pool.begin().await.map_err(sqlx_err)?;

        let expires_at = now + chrono::Duration::hours(24);
        let updated = sqlx::query(
            "UPDATE rooms SET status = 'active', accepted_at = $2, expires_at = $3 \
             WHERE room_id = $1 AND status = 'pending' \
             RETURNING room_id, status, created_at, accepted_at, expires_at, closed_at, archive_key",
        )
        .bind(room_id)
        .bind(now)
        .bind(expires_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(sqlx_err)?;

        let Some(room_row) = updated else {
            tx.rollback().await.map_err(sqlx_err)?;
            return Ok(None);
        };
        let room = room_from_row(&room_row)?;

        sqlx::query("INSERT INTO room_keys (room_id, room_key_enc) VALUES ($1, $2)")
            .bind(room_id)
            .bind(&wrapped_room_key)
            .execute(&mut *tx)
            .await
            .map_err(sqlx_err)?;

        let participant_row = sqlx::query(
            "INSERT INTO participants (room_id, role, device_id, ip_address, joined_at) \
             VALUES ($1, 'host', $2, $3, $4) \
             RETURNING id, room_id, role, device_id, display_name, ip_address, joined_at",
        )
        .bind(room_id)
        .bind(host_device_id)
        .bind(&host_ip)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(sqlx_err)?;
        let participant = participant_from_row(&participant_row)?;

        tx.commit().await.map_err(sqlx_err)?;
        Ok(Some((room, participant)))
    }

    async fn lock_room(&self, room_id: &str) -> Result<bool, ApiError> {
        let result = sqlx::query(
            "UPDATE rooms SET status = 'locked' WHERE room_id = $1 AND status = 'active' \
             RETURNING room_id",
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(result.is_some())
    }

    async fn unlock_room(&self, room_id: &str) -> Result<bool, ApiError> {
        let result = sqlx::query(
            "UPDATE rooms SET status = 'active' WHERE room_id = $1 AND status = 'locked' \
             RETURNING room_id",
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(result.is_some())
    }

    async fn close_room(&self, room_id: &str, now: DateTime<Utc>) -> Result<bool, ApiError> {
        let result = sqlx::query(
            "UPDATE rooms SET status = 'closed', closed_at = $2 \
             WHERE room_id = $1 AND status IN ('active', 'locked') RETURNING room_id",
        )
        .bind(room_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(result.is_some())
    }

    async fn archive_room(&self, room_id: &str, archive_key: &str) -> Result<bool, ApiError> {
        let result = sqlx::query(
            "UPDATE rooms SET status = 'archived', archive_key = $2 \
             WHERE room_id = $1 AND status = 'closed' RETURNING room_id",
        )
        .bind(room_id)
        .bind(archive_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(result.is_some())
    }

    async fn get_expired_rooms(&self, now: DateTime<Utc>) -> Result<Vec<String>, ApiError> {
        let rows = sqlx::query(
            "SELECT room_id FROM rooms WHERE status IN ('active', 'locked') AND expires_at < $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_err)?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("room_id").map_err(sqlx_err))
            .collect()
    }

    async fn get_wrapped_room_key(&self, room_id: &str) -> Result<Option<Vec<u8>>, ApiError> {
        let row = sqlx::query("SELECT room_key_enc FROM room_keys WHERE room_id = $1")
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?;
        row.map(|row| row.try_get::<Vec<u8>, _>("room_key_enc").map_err(sqlx_err))
            .transpose()
    }

    async fn get_participant(&self, participant_id: i64) -> Result<Option<Participant>, ApiError> {
        let row = sqlx::query(
            "SELECT id, room_id, role, device_id, display_name, ip_address, joined_at \
             FROM participants WHERE id = $1",
        )
        .bind(participant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?;
        row.as_ref().map(participant_from_row).transpose()
    }

    async fn get_participant_by_device(
        &self,
        room_id: &str,
        device_id: Uuid,
    ) -> Result<Option<Participant>, ApiError> {
        let row = sqlx::query(
            "SELECT id, room_id, role, device_id, display_name, ip_address, joined_at \
             FROM participants WHERE room_id = $1 AND device_id = $2",
        )
        .bind(room_id)
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?;
        row.as_ref().map(participant_from_row).transpose()
    }

    async fn count_participants(&self, room_id: &str) -> Result<u32, ApiError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM participants WHERE room_id = $1")
            .bind(room_id)
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_err)?;
        let count: i64 = row.try_get("count").map_err(sqlx_err)?;
        Ok(count.try_into().unwrap_or(u32::MAX))
    }

    async fn get_room_participants(&self, room_id: &str) -> Result<Vec<Participant>, ApiError> {
        let rows = sqlx::query(
            "SELECT id, room_id, role, device_id, display_name, ip_address, joined_at \
             FROM participants WHERE room_id = $1 ORDER BY joined_at",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_err)?;
        rows.iter().map(participant_from_row).collect()
    }

    async fn set_display_name(
        &self,
        participant_id: i64,
        display_name: &str,
    ) -> Result<bool, ApiError> {
        let result = sqlx::query(
            "UPDATE participants SET display_name = $2 WHERE id = $1 RETURNING id",
        )
        .bind(participant_id)
        .bind(display_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(result.is_some())
    }

    async fn validate_device_access(
        &self,
        room_id: &str,
        participant_id: i64,
        device_id: Uuid,
    ) -> Result<bool, ApiError> {
        let result = sqlx::query(
            "SELECT id FROM participants WHERE room_id = $1 AND id = $2 AND device_id = $3",
        )
        .bind(room_id)
        .bind(participant_id)
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(result.is_some())
    }

    async fn remove_participant(&self, participant_id: i64) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM participants WHERE id = $1")
            .bind(participant_id)
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn cleanup_inactive_participants(
        &self,
        room_id: &str,
        keep_ids: &[i64],
    ) -> Result<u64, ApiError> {
        let result = if keep_ids.is_empty() {
            sqlx::query("DELETE FROM participants WHERE room_id = $1")
                .bind(room_id)
                .execute(&self.pool)
                .await
                .map_err(sqlx_err)?
        } else {
            sqlx::query("DELETE FROM participants WHERE room_id = $1 AND NOT (id = ANY($2))")
                .bind(room_id)
                .bind(keep_ids)
                .execute(&self.pool)
                .await
                .map_err(sqlx_err)?
        };
        Ok(result.rows_affected())
    }

    async fn insert_participant_if_room_not_full(
        &self,
        room_id: &str,
        role: Role,
        device_id: Uuid,
        ip_address: Option<String>,
    ) -> Result<Option<Participant>, ApiError> {
        let mut tx = self.pool.begin().await.map_err(sqlx_err)?;

        // Row-lock the room for the duration of the transaction so two
        // concurrent joins cannot both observe count < 2.
        sqlx::query("SELECT room_id FROM rooms WHERE room_id = $1 FOR UPDATE")
            .bind(room_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(sqlx_err)?;

        let count_row = sqlx::query("SELECT COUNT(*) AS count FROM participants WHERE room_id = $1")
            .bind(room_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(sqlx_err)?;
        let count: i64 = count_row.try_get("count").map_err(sqlx_err)?;
        if count >= 2 {
            tx.rollback().await.map_err(sqlx_err)?;
            return Ok(None);
        }

        let row = sqlx::query(
            "INSERT INTO participants (room_id, role, device_id, ip_address, joined_at) \
             VALUES ($1, $2, $3, $4, now()) \
             RETURNING id, room_id, role, device_id, display_name, ip_address, joined_at",
        )
        .bind(room_id)
        .bind(role_to_str(role))
        .bind(device_id)
        .bind(&ip_address)
        .fetch_one(&mut *tx)
        .await
        .map_err(sqlx_err)?;
        let participant = participant_from_row(&row)?;

        tx.commit().await.map_err(sqlx_err)?;
        Ok(Some(participant))
    }

    async fn create_message(
        &self,
        room_id: &str,
        participant_id: i64,
        body_ct: Vec<u8>,
        nonce: Vec<u8>,
        tag: Vec<u8>,
        msg_type: MessageType,
        ip_address: Option<String>,
    ) -> Result<Message, ApiError> {
        let row = sqlx::query(
            "INSERT INTO messages (room_id, participant_id, body_ct, nonce, tag, msg_type, ip_address, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, now()) \
             RETURNING id, room_id, participant_id, created_at, body_ct, nonce, tag, msg_type, ip_address",
        )
        .bind(room_id)
        .bind(participant_id)
        .bind(&body_ct)
        .bind(&nonce)
        .bind(&tag)
        .bind(msg_type_to_str(msg_type))
        .bind(&ip_address)
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_err)?;
        message_from_row(&row)
    }

    async fn get_room_messages(&self, room_id: &str, limit: i64) -> Result<Vec<Message>, ApiError> {
        let rows = sqlx::query(
            "SELECT id, room_id, participant_id, created_at, body_ct, nonce, tag, msg_type, ip_address \
             FROM messages WHERE room_id = $1 ORDER BY created_at ASC, id ASC LIMIT $2",
        )
        .bind(room_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_err)?;
        rows.iter().map(message_from_row).collect()
    }

    async fn create_attachment(
        &self,
        room_id: &str,
        object_key: &str,
        mime_type: &str,
        size_bytes: i64,
    ) -> Result<Attachment, ApiError> {
        let row = sqlx::query(
            "INSERT INTO attachments (room_id, object_key, mime_type, size_bytes, available) \
             VALUES ($1, $2, $3, $4, FALSE) \
             RETURNING id, room_id, object_key, mime_type, size_bytes, available, message_id",
        )
        .bind(room_id)
        .bind(object_key)
        .bind(mime_type)
        .bind(size_bytes)
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_err)?;
        attachment_from_row(&row)
    }

    async fn get_attachment(
        &self,
        attachment_id: i64,
        room_id: &str,
    ) -> Result<Option<Attachment>, ApiError> {
        let row = sqlx::query(
            "SELECT id, room_id, object_key, mime_type, size_bytes, available, message_id \
             FROM attachments WHERE id = $1 AND room_id = $2",
        )
        .bind(attachment_id)
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?;
        row.as_ref().map(attachment_from_row).transpose()
    }

    async fn mark_attachment_available(&self, attachment_id: i64) -> Result<bool, ApiError> {
        let result = sqlx::query(
            "UPDATE attachments SET available = TRUE WHERE id = $1 AND available = FALSE \
             RETURNING id",
        )
        .bind(attachment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(result.is_some())
    }

    async fn link_attachment_to_message(
        &self,
        attachment_id: i64,
        room_id: &str,
        message_id: i64,
    ) -> Result<(), ApiError> {
        sqlx::query(
            "UPDATE attachments SET message_id = $3 \
             WHERE id = $1 AND room_id = $2 AND available = TRUE",
        )
        .bind(attachment_id)
        .bind(room_id)
        .bind(message_id)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }
}
