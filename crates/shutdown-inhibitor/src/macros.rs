/// Retries an async action with a growing back-off.
///
/// `$action` is re-evaluated (so it must contain the `.await`) until it returns
/// `Ok`, the error callback asks to stop, or `times` attempts were made. The
/// last result is returned either way.
macro_rules! retry {
    ($action:expr, times: $num_times:expr, error: $on_err:expr) => {{
        let mut n = 0u8;
        let mut duration = std::time::Duration::from_millis(100);
        loop {
            n += 1;
            let result = $action;
            match result {
                Ok(_) => break result,
                Err(ref e) => {
                    if $on_err(e, n) {
                        break result;
                    };
                    if n == $num_times {
                        break result;
                    }
                    tokio::time::sleep(duration).await;
                    duration *= (n + 1) as u32;
                }
            }
        }
    }};
    ($action:expr, times: $num_times:expr, log_error: $log:expr) => {
        retry!($action, times: $num_times, error: |e, _| { $log(e); false })
    };
    ($action:expr, times: $num_times:expr) => {
        retry!($action, times: $num_times, error: |_, _| { false })
    };
}
