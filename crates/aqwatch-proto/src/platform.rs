use std::path::PathBuf;

pub fn data_dir() -> PathBuf {
    // Use ~/.local/share/aqwatch/ (XDG standard) on unix instead of the
    // macOS Application Support folder for consistency.
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("aqwatch")
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("aqwatch")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("aqwatch")
    }
    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("aqwatch")
    }
}

pub fn temp_dir() -> PathBuf {
    std::env::temp_dir()
}
