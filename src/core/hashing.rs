//! 本地文件内容哈希（流式读取，不整体载入内存）

use crate::models::{ContentHash, HashAlgorithm};
use std::path::Path;
use tokio::io::AsyncReadExt;

const READ_BUFFER_SIZE: usize = 256 * 1024;

enum Hasher {
    Md5(md5::Context),
    Blake3(Box<blake3::Hasher>),
}

impl Hasher {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => Hasher::Md5(md5::Context::new()),
            HashAlgorithm::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(ctx) => ctx.consume(data),
            Hasher::Blake3(hasher) => {
                hasher.update(data);
            }
        }
    }

    fn finish(self) -> ContentHash {
        match self {
            Hasher::Md5(ctx) => ContentHash::new(HashAlgorithm::Md5, format!("{:x}", ctx.compute())),
            Hasher::Blake3(hasher) => {
                ContentHash::new(HashAlgorithm::Blake3, hasher.finalize().to_hex().to_string())
            }
        }
    }
}

/// 计算内存数据的哈希
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> ContentHash {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finish()
}

/// 计算本地文件的哈希
pub async fn hash_file(path: &Path, algorithm: HashAlgorithm) -> std::io::Result<ContentHash> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finish())
}
