//! SQL for the per-guild and user databases.

pub const GUILD_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS moderation_records (
        punishment_id INTEGER PRIMARY KEY AUTOINCREMENT,
        guild_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        user_name TEXT NOT NULL DEFAULT '',
        admin_id TEXT NOT NULL,
        message_id TEXT NOT NULL DEFAULT '',
        reason TEXT NOT NULL DEFAULT '',
        created_at INTEGER NOT NULL,
        evidence TEXT NOT NULL DEFAULT '[]',
        action_type TEXT NOT NULL,
        temp_roles TEXT NOT NULL DEFAULT '[]',
        roles_remove_at TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'active'
    );
    CREATE INDEX IF NOT EXISTS idx_moderation_user_action
        ON moderation_records (guild_id, user_id, action_type, created_at);
    CREATE INDEX IF NOT EXISTS idx_moderation_status ON moderation_records (status);

    CREATE TABLE IF NOT EXISTS personal_navigations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        guild_id TEXT NOT NULL,
        slot INTEGER NOT NULL CHECK (slot BETWEEN 1 AND 3),
        table_names TEXT NOT NULL DEFAULT '',
        channel_ids TEXT NOT NULL DEFAULT '',
        channel_names TEXT NOT NULL DEFAULT '',
        message_channel_id TEXT NOT NULL,
        my_works_message_ids TEXT NOT NULL DEFAULT '',
        top_works_message_id TEXT NOT NULL DEFAULT '',
        latest_works_message_id TEXT NOT NULL DEFAULT '',
        update_mode TEXT NOT NULL DEFAULT 'edit' CHECK (update_mode IN ('edit', 'delete')),
        UNIQUE (user_id, guild_id, slot)
    );

    CREATE TABLE IF NOT EXISTS guild_config (
        guild_id TEXT PRIMARY KEY,
        name TEXT NOT NULL DEFAULT '',
        admin_role_ids TEXT NOT NULL DEFAULT '',
        user_role_ids TEXT NOT NULL DEFAULT '',
        enabled INTEGER NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS preset_messages (
        id TEXT PRIMARY KEY,
        guild_id TEXT NOT NULL,
        name TEXT NOT NULL,
        value TEXT NOT NULL,
        kind TEXT NOT NULL DEFAULT 'text' CHECK (kind IN ('text', 'embed'))
    );

    CREATE TABLE IF NOT EXISTS top_channels (
        channel_id TEXT PRIMARY KEY,
        guild_id TEXT NOT NULL,
        message_limit INTEGER NOT NULL DEFAULT 10,
        excluded_ids TEXT NOT NULL DEFAULT ''
    );

    CREATE TABLE IF NOT EXISTS leaderboard_ads (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        guild_id TEXT NOT NULL,
        content TEXT NOT NULL,
        image_url TEXT,
        enabled INTEGER NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS punish_stats_channels (
        channel_id TEXT PRIMARY KEY,
        guild_id TEXT NOT NULL,
        target_guild_id TEXT NOT NULL,
        message_id TEXT
    );

    CREATE TABLE IF NOT EXISTS auto_triggers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        guild_id TEXT NOT NULL,
        keywords TEXT NOT NULL DEFAULT '[]',
        preset_id TEXT NOT NULL,
        channel_id TEXT
    );

    CREATE TABLE IF NOT EXISTS timed_tasks (
        kind TEXT NOT NULL,
        key TEXT NOT NULL,
        channel_id TEXT NOT NULL,
        message_id TEXT,
        updated_at INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (kind, key)
    );
";

/// Columns added after the first release; applied every start.
pub const GUILD_MIGRATIONS: &[&str] = &[
    "ALTER TABLE guild_config ADD COLUMN recovery_role_id TEXT",
    "ALTER TABLE preset_messages ADD COLUMN description TEXT NOT NULL DEFAULT ''",
];

pub const USER_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS user_preferences (
        user_id TEXT PRIMARY KEY,
        preferred_tag TEXT,
        excluded_tags TEXT NOT NULL DEFAULT '',
        updated_at INTEGER NOT NULL DEFAULT 0
    );
";

/// Columns every partition table carries.
pub const POST_COLUMNS: &str =
    "id, channel_id, title, author_name, author_id, content, tags, message_count, created_at, cover_image_url";

pub fn post_table_sql(quoted_table: &str, quoted_index: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {t} (
            id TEXT PRIMARY KEY,
            channel_id TEXT NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            author_name TEXT NOT NULL DEFAULT '',
            author_id TEXT NOT NULL DEFAULT '',
            content TEXT NOT NULL DEFAULT '',
            tags TEXT NOT NULL DEFAULT '',
            message_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            cover_image_url TEXT
        );
        CREATE INDEX IF NOT EXISTS {i} ON {t} (author_id);",
        t = quoted_table,
        i = quoted_index,
    )
}
