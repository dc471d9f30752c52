//! 命令行入口

pub mod history;
pub mod sync;

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "drivemirror", version, about = "把远程文件夹树增量镜像到本地目录")]
pub struct Cli {
    /// 输出 debug 日志
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// 数据目录（配置、日志、历史），默认 $DRIVEMIRROR_HOME 或平台配置目录
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// 执行一次同步
    Sync(SyncArgs),
    /// 查看最近的同步记录
    History(HistoryArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    Drive,
    Local,
    Webdav,
    S3,
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    #[arg(long, value_enum)]
    pub backend: Backend,

    /// 远程根文件夹 ID（drive 默认 "root"，其它后端默认存储根）
    #[arg(long)]
    pub root: Option<String>,

    /// 本地目标目录
    #[arg(long)]
    pub dest: PathBuf,

    /// local 后端的源目录
    #[arg(long)]
    pub source_dir: Option<String>,

    /// drive 的 API 地址，webdav/s3 的服务地址
    #[arg(long)]
    pub endpoint: Option<String>,

    #[arg(long)]
    pub username: Option<String>,

    #[arg(long, env = "DRIVEMIRROR_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[arg(long)]
    pub bucket: Option<String>,

    #[arg(long, default_value = "us-east-1")]
    pub region: String,

    #[arg(long, env = "DRIVEMIRROR_ACCESS_KEY", hide_env_values = true)]
    pub access_key: Option<String>,

    #[arg(long, env = "DRIVEMIRROR_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// 令牌文件（drive），默认数据目录下的 token.json
    #[arg(long)]
    pub token_file: Option<PathBuf>,

    #[arg(long)]
    pub chunk_size_mb: Option<u64>,

    /// 并发下载数
    #[arg(long)]
    pub jobs: Option<usize>,

    /// 不做写入后校验
    #[arg(long)]
    pub no_verify: bool,

    /// 路径冲突时保留第一个文件而不是终止
    #[arg(long)]
    pub keep_first: bool,

    /// 排除规则（glob），可重复
    #[arg(long = "exclude")]
    pub exclude: Vec<String>,

    /// 只列出需要下载的文件
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    #[arg(long, default_value_t = 10)]
    pub limit: u32,
}
