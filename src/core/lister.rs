use crate::core::retry::RetryPolicy;
use crate::error::{SyncError, SyncResult};
use crate::models::RemoteEntry;
use crate::remote::RemoteStore;
use futures::stream::{self, Stream, TryStreamExt};

enum PageCursor {
    First,
    Next(String),
    Exhausted,
}

/// 远程文件夹子条目列表（自动跟随分页）
#[derive(Clone, Copy)]
pub struct RemoteLister<'a> {
    remote: &'a dyn RemoteStore,
    retry: RetryPolicy,
}

impl<'a> RemoteLister<'a> {
    pub fn new(remote: &'a dyn RemoteStore, retry: RetryPolicy) -> Self {
        Self { remote, retry }
    }

    /// 惰性列出 `folder_id` 的直接子条目
    ///
    /// 每次调用都从第一页重新开始；某一页在重试后仍失败时流以 `RemoteUnavailable` 结束。
    pub fn children(&self, folder_id: &str) -> impl Stream<Item = SyncResult<RemoteEntry>> + 'a {
        let remote = self.remote;
        let retry = self.retry;
        let folder_id = folder_id.to_string();

        stream::try_unfold(PageCursor::First, move |cursor| {
            let folder_id = folder_id.clone();
            async move {
                let token = match cursor {
                    PageCursor::First => None,
                    PageCursor::Next(token) => Some(token),
                    PageCursor::Exhausted => return Ok(None),
                };

                let folder_ref = folder_id.as_str();
                let token_ref = token.as_deref();
                let page = retry
                    .run(&format!("列出文件夹 {}", folder_ref), move || {
                        remote.list_page(folder_ref, token_ref)
                    })
                    .await
                    .map_err(|e| SyncError::remote(format!("list {}", folder_ref), e))?;

                let next = match page.next_page_token {
                    Some(token) => PageCursor::Next(token),
                    None => PageCursor::Exhausted,
                };
                let entries = stream::iter(page.entries.into_iter().map(Ok::<_, SyncError>));
                Ok(Some((entries, next)))
            }
        })
        .try_flatten()
    }

    /// 收集全部子条目
    pub async fn list_all(&self, folder_id: &str) -> SyncResult<Vec<RemoteEntry>> {
        self.children(folder_id).try_collect().await
    }
}
