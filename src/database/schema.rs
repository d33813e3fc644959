pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS images (
        content_hash TEXT PRIMARY KEY,
        perceptual_hash TEXT,
        file_path TEXT,
        first_seen_ts TEXT,
        last_seen_ts TEXT
    );

    CREATE TABLE IF NOT EXISTS events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        content_hash TEXT,
        timestamp TEXT,
        action TEXT,
        actor TEXT,
        details TEXT,
        FOREIGN KEY (content_hash) REFERENCES images(content_hash)
    );
";
