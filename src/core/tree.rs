use crate::core::lister::RemoteLister;
use crate::error::{SyncError, SyncResult};
use crate::models::{ItemKind, RemoteEntry, RemoteItem};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 遍历配置
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// 排除规则（glob，匹配相对路径或文件名，不区分大小写）
    pub exclude_patterns: Vec<String>,
}

/// 把远程名称转换为单个安全的本地路径组件
///
/// 分隔符和 NUL 替换为 `_`，`.` 与 `..` 不允许作为名称。
pub fn sanitize_component(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            other => other,
        })
        .collect();

    match replaced.as_str() {
        "" => "_".to_string(),
        "." => "_".to_string(),
        ".." => "__".to_string(),
        _ => replaced,
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// 远程树展平器
///
/// 用显式栈做深度优先遍历，不改变进程工作目录。同一文件夹内按 (名称, ID) 排序，
/// 保证输出顺序确定。
pub struct TreeFlattener<'a> {
    lister: RemoteLister<'a>,
    config: ScanConfig,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl<'a> TreeFlattener<'a> {
    pub fn new(lister: RemoteLister<'a>) -> Self {
        Self {
            lister,
            config: ScanConfig::default(),
            cancel_flag: None,
        }
    }

    pub fn with_config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancel(mut self, cancel_flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(cancel_flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .map(|f| f.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// 检查路径是否应该被排除
    fn should_exclude(&self, path: &str) -> bool {
        self.config
            .exclude_patterns
            .iter()
            .any(|pattern| matches_pattern(path, pattern))
    }

    /// 展平整棵树，只返回文件
    pub async fn flatten(&self, root_id: &str) -> SyncResult<Vec<RemoteItem>> {
        let mut items = Vec::new();
        self.flatten_into(root_id, &mut items).await?;
        Ok(items)
    }

    /// 展平到 `out`；出错时已写入的条目保留
    pub async fn flatten_into(&self, root_id: &str, out: &mut Vec<RemoteItem>) -> SyncResult<()> {
        info!("开始遍历远程树: {}", root_id);

        let mut stack: Vec<(String, String)> = vec![(root_id.to_string(), String::new())];
        let mut visited_folders: HashSet<String> = HashSet::from([root_id.to_string()]);
        let mut seen_files: HashSet<String> = HashSet::new();
        let mut folder_count = 0usize;
        let mut excluded_count = 0usize;

        while let Some((folder_id, relative_path)) = stack.pop() {
            if self.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let mut children: Vec<RemoteEntry> = self.lister.list_all(&folder_id).await?;
            children.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
            debug!("文件夹 '{}' 有 {} 个子条目", relative_path, children.len());

            let mut subfolders = Vec::new();
            for child in children {
                let name = sanitize_component(&child.name);
                if name != child.name {
                    debug!("名称已转换: {:?} -> {}", child.name, name);
                }
                let child_path = join_path(&relative_path, &name);

                if self.should_exclude(&child_path) {
                    debug!("排除: {}", child_path);
                    excluded_count += 1;
                    continue;
                }

                match child.kind {
                    ItemKind::Folder => {
                        // 多父级文件夹只展开一次
                        if visited_folders.insert(child.id.clone()) {
                            folder_count += 1;
                            subfolders.push((child.id, child_path));
                        } else {
                            warn!("文件夹已遍历过，跳过: {} ({})", child_path, child.id);
                        }
                    }
                    ItemKind::File => {
                        if seen_files.insert(child.id.clone()) {
                            out.push(RemoteItem {
                                id: child.id,
                                name,
                                kind: ItemKind::File,
                                relative_path: relative_path.clone(),
                            });
                        } else {
                            warn!("文件出现在多个位置，只保留第一个: {} ({})", child_path, child.id);
                        }
                    }
                }
            }

            // 逆序入栈，按名称顺序出栈
            stack.extend(subfolders.into_iter().rev());
        }

        info!(
            "遍历完成: {} 个文件, {} 个文件夹, {} 个被排除",
            out.len(),
            folder_count,
            excluded_count
        );
        Ok(())
    }
}

/// 简单的 glob 模式匹配
fn matches_pattern(path: &str, pattern: &str) -> bool {
    let path = path.to_lowercase();
    let pattern = pattern.to_lowercase();

    if pattern.contains('*') || pattern.contains('?') {
        let mut regex_pattern = String::from("^");
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' if chars.peek() == Some(&'*') => {
                    chars.next();
                    regex_pattern.push_str(".*");
                }
                '*' => regex_pattern.push_str("[^/]*"),
                '?' => regex_pattern.push_str("[^/]"),
                other => regex_pattern.push_str(&regex::escape(&other.to_string())),
            }
        }
        regex_pattern.push('$');

        return match regex::Regex::new(&regex_pattern) {
            Ok(re) => {
                re.is_match(&path)
                    || path
                        .rsplit('/')
                        .next()
                        .map(|name| re.is_match(name))
                        .unwrap_or(false)
            }
            Err(e) => {
                warn!("无效的排除规则 {}: {}", pattern, e);
                false
            }
        };
    }

    // 精确匹配
    path == pattern || path.ends_with(&format!("/{}", pattern))
}
