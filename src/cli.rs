use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "audiocache", version, about = "音频预取缓存：后台预取、字节范围读取、FIFO 淘汰")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// 覆盖数据目录（默认走系统 data_local_dir）
    #[arg(long, env = "AUDIOCACHE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// 覆盖日志目录（默认 `{data_dir}/logs`）
    #[arg(long, env = "AUDIOCACHE_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// 覆盖日志过滤（等价于设置 RUST_LOG）
    #[arg(long, env = "RUST_LOG")]
    pub log_filter: Option<String>,

    /// 只用内存缓存，不落盘
    #[arg(long)]
    pub memory: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// 预取一批音频并等待队列清空
    Prefetch {
        #[arg(required = true)]
        urls: Vec<String>,

        /// 以低优先级排队
        #[arg(long)]
        low: bool,

        /// 覆盖并发预取数
        #[arg(long)]
        parallel: Option<usize>,
    },

    /// 通过缓存层读取一个地址
    Get {
        url: String,

        /// 例如 `bytes=0-1023`
        #[arg(long)]
        range: Option<String>,
    },

    /// 列出某个合集文件夹下已缓存的文件
    Ls { collection: u32, folder: String },

    /// 删除音频缓存
    Clear,
}
