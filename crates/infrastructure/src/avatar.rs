use std::path::PathBuf;

use application::{AvatarStorage, AvatarStorageError, ImageFormat};
use async_trait::async_trait;
use config::AvatarConfig;
use data_encoding::HEXLOWER;
use ring::digest::{digest, SHA256};

/// 把头像写到本地目录 `<storage_dir>/avatars/`。
///
/// 文件名是内容的 SHA-256，同一张图片总是得到同一个 URL，重复上传不会产生新文件。
#[derive(Debug, Clone)]
pub struct LocalAvatarStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalAvatarStorage {
    pub fn new(config: &AvatarConfig) -> Self {
        Self {
            root: PathBuf::from(&config.storage_dir).join("avatars"),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn file_name(bytes: &[u8], format: ImageFormat) -> String {
        let hash = digest(&SHA256, bytes);
        format!("{}.{}", HEXLOWER.encode(hash.as_ref()), format.extension())
    }
}

#[async_trait]
impl AvatarStorage for LocalAvatarStorage {
    async fn store(&self, bytes: &[u8], format: ImageFormat) -> Result<String, AvatarStorageError> {
        let file_name = Self::file_name(bytes, format);
        let path = self.root.join(&file_name);

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|err| AvatarStorageError(err.to_string()))?;

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::debug!(file = %file_name, "头像已存在，跳过写入");
        } else {
            // 先写临时文件再改名，读者不会看到写了一半的图片
            let tmp = self.root.join(format!("{file_name}.{}.tmp", uuid::Uuid::new_v4()));
            tokio::fs::write(&tmp, bytes)
                .await
                .map_err(|err| AvatarStorageError(err.to_string()))?;
            tokio::fs::rename(&tmp, &path)
                .await
                .map_err(|err| AvatarStorageError(err.to_string()))?;
            tracing::info!(file = %file_name, size = bytes.len(), "头像已保存");
        }

        Ok(format!("{}/avatars/{}", self.public_base_url, file_name))
    }
}
