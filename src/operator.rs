//! 操作员交互：阻塞式 y/n 询问与「处理完按回车」确认
//!
//! 只在错误恢复与整批暂停时使用。控制台实现在 spawn_blocking 里读 stdin；
//! 测试使用 ScriptedOperator 预置答案并记录问题。

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::Mutex;

use async_trait::async_trait;

#[async_trait]
pub trait Operator: Send + Sync {
    /// y/n 询问；读取失败按「否」处理
    async fn confirm(&self, question: &str) -> bool;

    /// 提示后等待操作员按回车（例如手动重新登录）
    async fn acknowledge(&self, message: &str);
}

fn is_yes(input: &str) -> bool {
    matches!(input.trim().to_lowercase().as_str(), "y" | "yes" | "д" | "да")
}

async fn read_line() -> Option<String> {
    tokio::task::spawn_blocking(|| {
        let mut input = String::new();
        match io::stdin().read_line(&mut input) {
            Ok(_) => Some(input),
            Err(_) => None,
        }
    })
    .await
    .ok()
    .flatten()
}

/// 控制台操作员
#[derive(Debug, Default)]
pub struct ConsoleOperator;

#[async_trait]
impl Operator for ConsoleOperator {
    async fn confirm(&self, question: &str) -> bool {
        print!("\n⚠️  {question} (y/n): ");
        let _ = io::stdout().flush();
        match read_line().await {
            Some(answer) => is_yes(&answer),
            None => {
                tracing::warn!("could not read operator answer, treating as 'no'");
                false
            }
        }
    }

    async fn acknowledge(&self, message: &str) {
        print!("\n⏸️  {message}\n   Press ENTER to continue... ");
        let _ = io::stdout().flush();
        let _ = read_line().await;
    }
}

/// 预置答案的操作员；答案用完后返回 default_answer
#[derive(Debug)]
pub struct ScriptedOperator {
    answers: Mutex<VecDeque<bool>>,
    default_answer: bool,
    asked: Mutex<Vec<String>>,
}

impl ScriptedOperator {
    pub fn new(answers: &[bool], default_answer: bool) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            default_answer,
            asked: Mutex::new(Vec::new()),
        }
    }

    /// 总是回答 yes
    pub fn agreeable() -> Self {
        Self::new(&[], true)
    }

    /// 迄今为止收到的所有问题与确认提示
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().map(|a| a.clone()).unwrap_or_default()
    }

    fn record(&self, text: &str) {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(text.to_string());
        }
    }
}

#[async_trait]
impl Operator for ScriptedOperator {
    async fn confirm(&self, question: &str) -> bool {
        self.record(question);
        self.answers
            .lock()
            .ok()
            .and_then(|mut a| a.pop_front())
            .unwrap_or(self.default_answer)
    }

    async fn acknowledge(&self, message: &str) {
        self.record(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(is_yes("да"));
        assert!(!is_yes("n"));
        assert!(!is_yes(""));
    }

    #[tokio::test]
    async fn test_scripted_answers_then_default() {
        let op = ScriptedOperator::new(&[false, true], false);
        assert!(!op.confirm("first?").await);
        assert!(op.confirm("second?").await);
        assert!(!op.confirm("third?").await);
        op.acknowledge("log in again").await;
        assert_eq!(op.asked().len(), 4);
    }
}
