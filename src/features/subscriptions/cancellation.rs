use crate::shared::errors::{AppError, AppResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

type CancelHook = Box<dyn Fn() + Send>;

/// ストア操作の中断要求
///
/// サービス層が制限時間を超えた操作に対して `cancel` を呼び、
/// ストアは登録したフックで実行中のステートメントを中断する。
/// 中断されたステートメントは何もコミットしない。
#[derive(Clone, Default)]
pub struct Cancellation {
    inner: Arc<CancellationState>,
}

#[derive(Default)]
struct CancellationState {
    cancelled: AtomicBool,
    hook: Mutex<Option<CancelHook>>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// 中断を要求し、登録済みのフックがあれば呼び出す
    pub fn cancel(&self) {
        let hook = self.lock_hook();
        self.inner.cancelled.store(true, Ordering::SeqCst);
        if let Some(hook) = hook.as_ref() {
            hook();
        }
    }

    /// 中断済みであれば `Storage` エラーを返す
    ///
    /// # 引数
    /// * `operation` - 実行しようとしている操作名
    pub fn check(&self, operation: &str) -> AppResult<()> {
        if self.is_cancelled() {
            return Err(cancelled_error(operation));
        }
        Ok(())
    }

    /// 中断時に呼び出すフックを登録する
    ///
    /// 戻り値のガードが破棄されるとフックは解除される。
    /// すでに中断済みの場合はフックを登録せずにエラーを返す。
    ///
    /// # 引数
    /// * `operation` - 実行中の操作名（エラーメッセージ用）
    /// * `hook` - 中断時に呼び出す処理
    pub fn register<F>(&self, operation: &str, hook: F) -> AppResult<CancelGuard<'_>>
    where
        F: Fn() + Send + 'static,
    {
        let mut slot = self.lock_hook();
        if self.is_cancelled() {
            return Err(cancelled_error(operation));
        }
        *slot = Some(Box::new(hook));
        Ok(CancelGuard { state: &self.inner })
    }

    fn lock_hook(&self) -> MutexGuard<'_, Option<CancelHook>> {
        lock_state(&self.inner)
    }
}

/// 登録したフックの有効期間
///
/// フックの解除と `cancel` は同じロックで直列化されるため、
/// ガード破棄後にフックが呼ばれることはない。
pub struct CancelGuard<'a> {
    state: &'a CancellationState,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        lock_state(self.state).take();
    }
}

fn lock_state(state: &CancellationState) -> MutexGuard<'_, Option<CancelHook>> {
    // フックはロック中にパニックしない前提なので、汚染されていても中身は有効
    state.hook.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn cancelled_error(operation: &str) -> AppError {
    AppError::storage(operation, "操作は中断されました")
}
