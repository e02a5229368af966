//! Built-in user and channel directory.
//!
//! The runtime keeps track of who is in which channel and each channel's
//! topic. Plugins read it through [`Directory`].

use std::sync::LazyLock;

use super::error::{QueryError, StorageResult};
use super::migration::TableDescriptor;
use super::Storage;
use crate::params;

/// Owner name used when claiming the directory tables.
pub const DIRECTORY_OWNER: &str = "sprocket";

static TABLES: LazyLock<[TableDescriptor; 3]> = LazyLock::new(|| {
    [
        TableDescriptor::new("user").step(
            1,
            "CREATE TABLE user (\
                id INTEGER PRIMARY KEY ASC, \
                nick TEXT NOT NULL UNIQUE, \
                realname TEXT, \
                host TEXT)",
        ),
        TableDescriptor::new("channel").step(
            1,
            "CREATE TABLE channel (\
                id INTEGER PRIMARY KEY ASC, \
                name TEXT NOT NULL UNIQUE, \
                topic TEXT)",
        ),
        TableDescriptor::new("membership").step(
            1,
            "CREATE TABLE membership (\
                user_id INTEGER NOT NULL REFERENCES user(id) ON DELETE CASCADE, \
                channel_id INTEGER NOT NULL REFERENCES channel(id) ON DELETE CASCADE, \
                UNIQUE(user_id, channel_id))",
        ),
    ]
});

/// A channel member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub nick: String,
    pub realname: Option<String>,
}

/// Membership and topic bookkeeping on top of [`Storage`].
#[derive(Debug, Clone)]
pub struct Directory {
    storage: Storage,
}

impl Directory {
    /// Registers the directory tables and returns a handle to them.
    pub async fn install(storage: &Storage) -> StorageResult<Self> {
        for table in TABLES.iter() {
            storage.register_table(DIRECTORY_OWNER, table).await?;
        }
        Ok(Self {
            storage: storage.clone(),
        })
    }

    /// Records that `nick` is in `channel`, creating both as needed.
    pub async fn add_membership(&self, nick: &str, channel: &str) -> Result<(), QueryError> {
        let mut tx = self.storage.begin().await?;
        tx.execute(
            "INSERT INTO user (nick) VALUES (?) ON CONFLICT(nick) DO NOTHING",
            &params![nick],
        )
        .await?;
        tx.execute(
            "INSERT INTO channel (name) VALUES (?) ON CONFLICT(name) DO NOTHING",
            &params![channel],
        )
        .await?;
        tx.execute(
            "INSERT INTO membership (user_id, channel_id) \
             SELECT u.id, c.id FROM user u, channel c WHERE u.nick = ? AND c.name = ? \
             ON CONFLICT DO NOTHING",
            &params![nick, channel],
        )
        .await?;
        tx.commit().await
    }

    /// Returns whether a membership was removed.
    pub async fn remove_membership(&self, nick: &str, channel: &str) -> Result<bool, QueryError> {
        let done = self
            .storage
            .execute(
                "DELETE FROM membership \
                 WHERE user_id IN (SELECT id FROM user WHERE nick = ?) \
                   AND channel_id IN (SELECT id FROM channel WHERE name = ?)",
                &params![nick, channel],
            )
            .await?;
        Ok(done.rows_affected > 0)
    }

    /// Forgets everyone in `channel`, e.g. before a fresh names listing.
    pub async fn clear_channel(&self, channel: &str) -> Result<u64, QueryError> {
        let done = self
            .storage
            .execute(
                "DELETE FROM membership \
                 WHERE channel_id IN (SELECT id FROM channel WHERE name = ?)",
                &params![channel],
            )
            .await?;
        Ok(done.rows_affected)
    }

    /// Forgets every membership, e.g. after a reconnect.
    pub async fn clear_all(&self) -> Result<u64, QueryError> {
        let done = self.storage.execute("DELETE FROM membership", &[]).await?;
        Ok(done.rows_affected)
    }

    /// Members of `channel` ordered by nick.
    pub async fn members(&self, channel: &str) -> Result<Vec<Member>, QueryError> {
        self.storage
            .query(
                "SELECT u.nick, u.realname FROM user u \
                 JOIN membership m ON u.id = m.user_id \
                 JOIN channel c ON c.id = m.channel_id \
                 WHERE c.name = ? ORDER BY u.nick",
                &params![channel],
            )
            .await?
            .map(|row| {
                Ok(Member {
                    nick: row.get(0)?,
                    realname: row.get(1)?,
                })
            })
            .collect()
    }

    pub async fn set_topic(&self, channel: &str, topic: &str) -> Result<(), QueryError> {
        self.storage
            .execute(
                "INSERT INTO channel (name, topic) VALUES (?, ?) \
                 ON CONFLICT(name) DO UPDATE SET topic = excluded.topic",
                &params![channel, topic],
            )
            .await?;
        Ok(())
    }

    pub async fn topic(&self, channel: &str) -> Result<Option<String>, QueryError> {
        match self
            .storage
            .query_optional("SELECT topic FROM channel WHERE name = ?", &params![channel])
            .await?
        {
            Some(row) => row.get(0),
            None => Ok(None),
        }
    }

    /// Follows a nick change. Returns false when the old nick is unknown.
    ///
    /// If the new nick was seen before, its record is reused and the old
    /// nick's memberships move onto it.
    pub async fn rename_user(&self, old: &str, new: &str) -> Result<bool, QueryError> {
        if old == new {
            let known = self
                .storage
                .query_optional("SELECT 1 FROM user WHERE nick = ?", &params![old])
                .await?;
            return Ok(known.is_some());
        }

        let mut tx = self.storage.begin().await?;
        let known = tx
            .query("SELECT 1 FROM user WHERE nick = ?", &params![old])
            .await?
            .next()
            .is_some();
        if !known {
            tx.rollback().await?;
            return Ok(false);
        }
        tx.execute(
            "INSERT INTO user (nick, realname, host) \
             SELECT ?, realname, host FROM user WHERE nick = ? \
             ON CONFLICT(nick) DO NOTHING",
            &params![new, old],
        )
        .await?;
        tx.execute(
            "INSERT OR IGNORE INTO membership (user_id, channel_id) \
             SELECT (SELECT id FROM user WHERE nick = ?), m.channel_id \
             FROM membership m JOIN user u ON u.id = m.user_id WHERE u.nick = ?",
            &params![new, old],
        )
        .await?;
        // Memberships of the old record go with it.
        tx.execute("DELETE FROM user WHERE nick = ?", &params![old])
            .await?;
        tx.commit().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn directory() -> Directory {
        let storage = Storage::in_memory().await.unwrap();
        Directory::install(&storage).await.unwrap()
    }

    fn nicks(members: &[Member]) -> Vec<&str> {
        members.iter().map(|m| m.nick.as_str()).collect()
    }

    #[tokio::test]
    async fn install_is_idempotent() {
        let storage = Storage::in_memory().await.unwrap();
        Directory::install(&storage).await.unwrap();
        Directory::install(&storage).await.unwrap();
        assert_eq!(storage.table_version("membership").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn memberships() {
        let dir = directory().await;
        dir.add_membership("bob", "#rust").await.unwrap();
        dir.add_membership("alice", "#rust").await.unwrap();
        dir.add_membership("alice", "#rust").await.unwrap();
        dir.add_membership("alice", "#sqlite").await.unwrap();

        let members = dir.members("#rust").await.unwrap();
        assert_eq!(nicks(&members), ["alice", "bob"]);
        assert_eq!(members[0].realname, None);

        assert!(dir.remove_membership("bob", "#rust").await.unwrap());
        assert!(!dir.remove_membership("bob", "#rust").await.unwrap());
        assert_eq!(nicks(&dir.members("#rust").await.unwrap()), ["alice"]);

        assert_eq!(dir.clear_channel("#rust").await.unwrap(), 1);
        assert!(dir.members("#rust").await.unwrap().is_empty());
        assert_eq!(dir.clear_all().await.unwrap(), 1);
        assert!(dir.members("#sqlite").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn topics() {
        let dir = directory().await;
        assert_eq!(dir.topic("#rust").await.unwrap(), None);
        dir.set_topic("#rust", "ownership").await.unwrap();
        dir.set_topic("#rust", "borrowing").await.unwrap();
        assert_eq!(dir.topic("#rust").await.unwrap().as_deref(), Some("borrowing"));
    }

    #[tokio::test]
    async fn renames_follow_the_user() {
        let dir = directory().await;
        dir.add_membership("alice", "#rust").await.unwrap();
        dir.add_membership("bob", "#rust").await.unwrap();

        assert!(dir.rename_user("alice", "alicia").await.unwrap());
        assert!(!dir.rename_user("nobody", "x").await.unwrap());
        assert_eq!(nicks(&dir.members("#rust").await.unwrap()), ["alicia", "bob"]);
    }

    #[tokio::test]
    async fn rename_onto_a_nick_seen_earlier() {
        let dir = directory().await;
        dir.add_membership("alice", "#rust").await.unwrap();
        dir.remove_membership("alice", "#rust").await.unwrap();
        dir.add_membership("carol", "#rust").await.unwrap();
        dir.add_membership("carol", "#sqlite").await.unwrap();

        assert!(dir.rename_user("carol", "alice").await.unwrap());
        assert_eq!(nicks(&dir.members("#rust").await.unwrap()), ["alice"]);
        assert_eq!(nicks(&dir.members("#sqlite").await.unwrap()), ["alice"]);

        // The old nick is free again.
        assert!(!dir.rename_user("carol", "dave").await.unwrap());
    }

    #[tokio::test]
    async fn rename_merges_shared_channels() {
        let dir = directory().await;
        dir.add_membership("alice", "#rust").await.unwrap();
        dir.add_membership("alice_", "#rust").await.unwrap();
        dir.add_membership("alice_", "#sqlite").await.unwrap();

        assert!(dir.rename_user("alice_", "alice").await.unwrap());
        assert_eq!(nicks(&dir.members("#rust").await.unwrap()), ["alice"]);
        assert_eq!(nicks(&dir.members("#sqlite").await.unwrap()), ["alice"]);
    }
}
