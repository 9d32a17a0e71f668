// Copyright 2026 The Skitter Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{future::Future, time::Duration};

/// Retries the specified fallible future with the delay strategy specified
/// by the `timeouts` iterator.
pub async fn retry_future<T, E, Fut>(
    mut timeouts: impl Iterator<Item = Duration>,
    mut future_fn: impl FnMut() -> Fut,
) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
{
    loop {
        match future_fn().await {
            Ok(output) => return Ok(output),
            Err(err) => {
                let timeout = match timeouts.next() {
                    Some(timeout) => timeout,
                    None => return Err(err),
                };
                tokio::time::sleep(timeout).await;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct FixedInterval {
    interval: Duration,
}

impl FixedInterval {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Iterator for FixedInterval {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.interval)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn retries_until_success() {
        let attempts = AtomicUsize::new(0);
        let result: Result<usize, &str> = retry_future(
            FixedInterval::new(Duration::from_millis(1)).take(5),
            || async {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 {
                    Err("not yet")
                } else {
                    Ok(attempt)
                }
            },
        )
        .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let result: Result<(), &str> = retry_future(
            FixedInterval::new(Duration::from_millis(1)).take(2),
            || async { Err("always") },
        )
        .await;
        assert_eq!(result, Err("always"));
    }
}
