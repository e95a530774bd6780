//! YAML config source backed by [`FileSource`]. The default format.

use std::path::PathBuf;

use super::file_source::FileSource;
use crate::config::model::Config;

#[must_use]
pub fn new(path: PathBuf) -> FileSource {
    FileSource::new(path, "yaml", |content| {
        serde_yml::from_str::<Config>(content)
            .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigSource;

    #[tokio::test]
    async fn loads_yaml_file() {
        let path = std::env::temp_dir().join(format!("fulcrum-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "strategy: roundrobin\nbackends:\n  - id: a\n    host: localhost\n    port: 3000\n    weight: 2\n",
        )
        .unwrap();
        let source = new(path.clone());
        let (config, _) = source.load().await.unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(source.name(), "yaml");
        assert_eq!(config.backends[0].weight, 2);
    }
}
