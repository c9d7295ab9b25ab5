use rusqlite::Connection;

use crate::libs::backend::backend_traits::BackendError;

/// Creates the local tables. Mirrors the hosted schema (`profiles`, `posts`,
/// `post_likes`, `stories`, `messages`) plus the auth tables the hosted service
/// keeps to itself. Timestamps are unix microseconds.
pub fn migrate(connection: &mut Connection) -> Result<(), BackendError> {
    let tx = connection.transaction()?;

    tx.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            user_id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            salt TEXT NOT NULL,
            full_name TEXT,
            confirmed BOOLEAN NOT NULL DEFAULT false,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS verification_codes (
            email TEXT PRIMARY KEY,
            code TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS profiles (
            id TEXT PRIMARY KEY,
            full_name TEXT,
            avatar_url TEXT,
            username TEXT UNIQUE,
            bio TEXT,
            phone TEXT,
            updated_at INTEGER
        );

        CREATE TABLE IF NOT EXISTS posts (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            content TEXT NOT NULL,
            type TEXT NOT NULL DEFAULT 'text',
            media_url TEXT,
            title TEXT,
            language TEXT,
            comments INTEGER NOT NULL DEFAULT 0,
            shares INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,

            CHECK (type IN ('text', 'code', 'image', 'video'))
        );

        CREATE TABLE IF NOT EXISTS post_likes (
            post_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,

            PRIMARY KEY (post_id, user_id),
            FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS stories (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            media_url TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            sender_id TEXT NOT NULL,
            receiver_id TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts(created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_stories_expires_at ON stories(expires_at);
        CREATE INDEX IF NOT EXISTS idx_messages_pair
            ON messages(sender_id, receiver_id, created_at);
        "#,
    )?;

    tx.commit()?;
    Ok(())
}
