use std::path::PathBuf;

const DATA_DIR_NAME: &str = ".flowbench";

/// Checked in order; `FLOWBENCH_HOME` lets tests and CI isolate their state.
const HOME_VARS: [&str; 3] = ["FLOWBENCH_HOME", "HOME", "USERPROFILE"];

pub fn home_dir() -> Option<PathBuf> {
    HOME_VARS
        .into_iter()
        .find_map(std::env::var_os)
        .map(PathBuf::from)
}

/// `.env` file read once for provider API keys.
pub fn home_env_path() -> Option<PathBuf> {
    home_dir().map(|dir| dir.join(".env"))
}

/// Holds the run database and logs; falls back to the working directory.
pub fn data_dir() -> PathBuf {
    home_dir().map_or_else(|| PathBuf::from(DATA_DIR_NAME), |dir| dir.join(DATA_DIR_NAME))
}

pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}
