//! ScriptedPage：内存中的聊天页面（用于测试，无需浏览器）
//!
//! 按 Selectors 中的定位器识别元素角色，模拟输入框、生成中状态、用户与助手消息、
//! 弹窗、项目列表与模型菜单。提交时从回复队列取一个 Reply；队列为空则回显提示词。
//! 整页文本和真实页面一样包含对话内容，除非调用方把对应定位器列入排除。

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::page::{DriverError, ElementHandle, ElementState, Locator, PageDriver, Selectors};

/// 一次提交后页面的反应
#[derive(Debug, Clone)]
pub struct Reply {
    /// 依次读取到的文本，最后一项保持不变
    pub reads: Vec<String>,
    /// 生成持续的轮询次数（期间输入框禁用、停止按钮可见、消息带加载标记）
    pub generating_ticks: u32,
    /// 是否出现新的助手消息
    pub appears: bool,
    /// 提交后页面上出现的错误文本
    pub page_error: Option<String>,
}

impl Reply {
    pub fn text(text: &str) -> Self {
        Self {
            reads: vec![text.to_string()],
            generating_ticks: 0,
            appears: true,
            page_error: None,
        }
    }

    pub fn reads(reads: &[&str]) -> Self {
        Self {
            reads: reads.iter().map(|s| s.to_string()).collect(),
            ..Self::text("")
        }
    }

    /// 没有任何回复
    pub fn silent() -> Self {
        Self {
            appears: false,
            ..Self::text("")
        }
    }

    /// 提交后页面报错，没有回复
    pub fn page_error(body: &str) -> Self {
        Self {
            page_error: Some(body.to_string()),
            ..Self::silent()
        }
    }

    /// 回复照常出现，同时页面上出现错误横幅
    pub fn with_banner(mut self, body: &str) -> Self {
        self.page_error = Some(body.to_string());
        self
    }

    pub fn generating(mut self, ticks: u32) -> Self {
        self.generating_ticks = ticks;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Input,
    StopButton,
    AssistantMessage,
    UserMessage,
    NewChat,
    Dialog,
    ProjectLink,
    ModelSwitcher,
    LegacyModels,
    ModelOption,
    Other,
}

#[derive(Debug)]
struct Message {
    reads: VecDeque<String>,
}

impl Message {
    fn read(&mut self) -> String {
        if self.reads.len() > 1 {
            self.reads.pop_front().unwrap_or_default()
        } else {
            self.reads.front().cloned().unwrap_or_default()
        }
    }

    /// 当前显示的文本，不推进读取序列
    fn shown(&self) -> String {
        self.reads.front().cloned().unwrap_or_default()
    }
}

#[derive(Debug)]
struct PageState {
    input_present: bool,
    input_visible: bool,
    input_disabled: bool,
    input_readonly: bool,
    placeholder: Option<String>,
    input_value: String,
    stop_visible: bool,
    generating: u32,
    messages: Vec<Message>,
    /// 当前对话中用户发出的提示词
    prompts: Vec<String>,
    replies: VecDeque<Reply>,
    body_text: String,
    read_latency: Duration,
    dialogs: Vec<String>,
    stale_reads: u32,
    new_chat_present: bool,
    projects: Vec<String>,
    current_project: Option<String>,
    main_models: Vec<String>,
    legacy_models: Vec<String>,
    menu_open: bool,
    legacy_open: bool,
    selected_model: Option<String>,
    url: String,
    clicks: Vec<String>,
    submissions: Vec<String>,
    reloads: u32,
}

impl Default for PageState {
    fn default() -> Self {
        Self {
            input_present: true,
            input_visible: true,
            input_disabled: false,
            input_readonly: false,
            placeholder: None,
            input_value: String::new(),
            stop_visible: false,
            generating: 0,
            messages: Vec::new(),
            prompts: Vec::new(),
            replies: VecDeque::new(),
            body_text: String::new(),
            read_latency: Duration::ZERO,
            dialogs: Vec::new(),
            stale_reads: 0,
            new_chat_present: true,
            projects: Vec::new(),
            current_project: None,
            main_models: ["Auto", "Instant", "Thinking"].map(String::from).to_vec(),
            legacy_models: [
                "GPT-5.2",
                "GPT-5.1 Instant",
                "GPT-5.1 Thinking",
                "GPT-5 Instant",
                "GPT-5 Thinking mini",
                "GPT-5 Thinking",
                "GPT-4o",
                "GPT-4.1",
                "o3",
                "o4-mini",
            ]
            .map(String::from)
            .to_vec(),
            menu_open: false,
            legacy_open: false,
            selected_model: None,
            url: "https://chatgpt.com/".to_string(),
            clicks: Vec::new(),
            submissions: Vec::new(),
            reloads: 0,
        }
    }
}

impl PageState {
    fn open_new_conversation(&mut self) {
        self.messages.clear();
        self.prompts.clear();
        self.generating = 0;
    }

    fn apply_submission(&mut self, prompt: String) {
        let reply = self
            .replies
            .pop_front()
            .unwrap_or_else(|| Reply::text(&format!("Response to: {prompt}")));
        self.prompts.push(prompt.clone());
        self.submissions.push(prompt);
        if let Some(body) = reply.page_error {
            self.body_text = body;
        }
        if reply.appears {
            self.messages.push(Message {
                reads: reply.reads.into_iter().collect(),
            });
            self.generating = reply.generating_ticks;
        }
    }

    fn model_options(&self) -> Vec<String> {
        let mut options = Vec::new();
        if self.menu_open {
            options.extend(self.main_models.iter().cloned());
        }
        if self.legacy_open {
            options.extend(self.legacy_models.iter().cloned());
        }
        options
    }
}

/// 脚本化页面
pub struct ScriptedPage {
    selectors: Selectors,
    state: Mutex<PageState>,
}

impl ScriptedPage {
    pub fn new(selectors: Selectors) -> Self {
        Self {
            selectors,
            state: Mutex::new(PageState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn role_of(&self, locator: &Locator) -> Role {
        let s = &self.selectors;
        if s.input.contains(locator) {
            Role::Input
        } else if s.stop_button.contains(locator) {
            Role::StopButton
        } else if s.assistant_message.contains(locator) {
            Role::AssistantMessage
        } else if s.user_message.contains(locator) {
            Role::UserMessage
        } else if s.new_chat.contains(locator) {
            Role::NewChat
        } else if s.dialog.contains(locator) {
            Role::Dialog
        } else if s.project_link.contains(locator) {
            Role::ProjectLink
        } else if s.model_switcher.contains(locator) {
            Role::ModelSwitcher
        } else if s.legacy_models.contains(locator) {
            Role::LegacyModels
        } else if s.model_option.contains(locator) {
            Role::ModelOption
        } else {
            Role::Other
        }
    }

    fn stale(el: &ElementHandle) -> DriverError {
        DriverError::Stale(format!("{} #{}", el.locator, el.index))
    }

    // ---- 场景设置 ----

    pub fn set_input_present(&self, present: bool) {
        self.state().input_present = present;
    }

    pub fn set_input_disabled(&self, disabled: bool) {
        self.state().input_disabled = disabled;
    }

    pub fn set_input_readonly(&self, readonly: bool) {
        self.state().input_readonly = readonly;
    }

    pub fn set_placeholder(&self, placeholder: Option<&str>) {
        self.state().placeholder = placeholder.map(String::from);
    }

    pub fn set_input_value(&self, value: &str) {
        self.state().input_value = value.to_string();
    }

    pub fn set_stop_visible(&self, visible: bool) {
        self.state().stop_visible = visible;
    }

    pub fn set_body_text(&self, text: &str) {
        self.state().body_text = text.to_string();
    }

    /// 整页文本读取的额外耗时
    pub fn set_read_latency(&self, latency: Duration) {
        self.state().read_latency = latency;
    }

    pub fn show_dialog(&self, text: &str) {
        self.state().dialogs.push(text.to_string());
    }

    /// 接下来 n 次读消息文本时报元素过期
    pub fn set_stale_reads(&self, n: u32) {
        self.state().stale_reads = n;
    }

    pub fn set_new_chat_present(&self, present: bool) {
        self.state().new_chat_present = present;
    }

    pub fn set_projects(&self, names: &[&str]) {
        self.state().projects = names.iter().map(|s| s.to_string()).collect();
    }

    pub fn push_reply(&self, reply: Reply) {
        self.state().replies.push_back(reply);
    }

    pub fn push_assistant_message(&self, text: &str) {
        self.push_assistant_reads(&[text]);
    }

    pub fn push_assistant_reads(&self, reads: &[&str]) {
        self.state().messages.push(Message {
            reads: reads.iter().map(|s| s.to_string()).collect(),
        });
    }

    /// 不经过输入框直接模拟一次提交
    pub fn submit_prompt(&self, prompt: &str) {
        self.state().apply_submission(prompt.to_string());
    }

    // ---- 观察 ----

    pub fn submissions(&self) -> Vec<String> {
        self.state().submissions.clone()
    }

    pub fn clicks(&self) -> Vec<String> {
        self.state().clicks.clone()
    }

    pub fn new_chat_clicks(&self) -> usize {
        self.state().clicks.iter().filter(|c| *c == "new_chat").count()
    }

    pub fn reloads(&self) -> u32 {
        self.state().reloads
    }

    pub fn current_project(&self) -> Option<String> {
        self.state().current_project.clone()
    }

    pub fn selected_model(&self) -> Option<String> {
        self.state().selected_model.clone()
    }

    pub fn message_count(&self) -> usize {
        self.state().messages.len()
    }
}

fn handles(locator: &Locator, n: usize) -> Vec<ElementHandle> {
    (0..n).map(|i| ElementHandle::new(locator.clone(), i)).collect()
}

#[async_trait]
impl PageDriver for ScriptedPage {
    async fn find_all(&self, locator: &Locator) -> Result<Vec<ElementHandle>, DriverError> {
        let role = self.role_of(locator);
        let st = self.state();
        let n = match role {
            Role::Input => usize::from(st.input_present),
            Role::StopButton => usize::from(st.stop_visible || st.generating > 0),
            Role::AssistantMessage => st.messages.len(),
            Role::UserMessage => st.prompts.len(),
            Role::NewChat => usize::from(st.new_chat_present),
            Role::Dialog => st.dialogs.len(),
            Role::ProjectLink => st.projects.len(),
            Role::ModelSwitcher => 1,
            Role::LegacyModels => usize::from(st.menu_open),
            Role::ModelOption => st.model_options().len(),
            Role::Other => 0,
        };
        Ok(handles(locator, n))
    }

    async fn element_state(&self, el: &ElementHandle) -> Result<ElementState, DriverError> {
        let role = self.role_of(&el.locator);
        let mut st = self.state();
        if role == Role::Input {
            if !st.input_present {
                return Err(Self::stale(el));
            }
            let generating = st.generating > 0;
            if generating {
                st.generating -= 1;
            }
            return Ok(ElementState {
                visible: st.input_visible,
                disabled: st.input_disabled || generating,
                readonly: st.input_readonly,
                placeholder: st.placeholder.clone(),
            });
        }
        Ok(ElementState {
            visible: true,
            ..ElementState::default()
        })
    }

    async fn text_of(&self, el: &ElementHandle) -> Result<String, DriverError> {
        let role = self.role_of(&el.locator);
        let mut st = self.state();
        match role {
            Role::AssistantMessage => {
                if st.stale_reads > 0 {
                    st.stale_reads -= 1;
                    return Err(Self::stale(el));
                }
                st.messages
                    .get_mut(el.index)
                    .map(Message::read)
                    .ok_or_else(|| Self::stale(el))
            }
            Role::UserMessage => st.prompts.get(el.index).cloned().ok_or_else(|| Self::stale(el)),
            Role::Dialog => st.dialogs.get(el.index).cloned().ok_or_else(|| Self::stale(el)),
            Role::ProjectLink => st.projects.get(el.index).cloned().ok_or_else(|| Self::stale(el)),
            Role::ModelOption => st
                .model_options()
                .get(el.index)
                .cloned()
                .ok_or_else(|| Self::stale(el)),
            Role::LegacyModels => Ok("Legacy models".to_string()),
            Role::Input => Ok(st.input_value.clone()),
            _ => Ok(String::new()),
        }
    }

    async fn contains(&self, el: &ElementHandle, _locator: &Locator) -> Result<bool, DriverError> {
        let st = self.state();
        if self.role_of(&el.locator) != Role::AssistantMessage {
            return Ok(false);
        }
        // 只有最新一条消息可能仍在生成
        Ok(st.generating > 0 && el.index + 1 == st.messages.len())
    }

    async fn body_text(&self, exclude: &[Locator]) -> Result<String, DriverError> {
        let latency = self.state().read_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let skip = |role: Role| exclude.iter().any(|l| self.role_of(l) == role);
        let st = self.state();
        let mut parts = Vec::new();
        if !skip(Role::UserMessage) {
            parts.extend(st.prompts.iter().cloned());
        }
        if !skip(Role::AssistantMessage) {
            parts.extend(st.messages.iter().map(Message::shown));
        }
        parts.extend(st.dialogs.iter().cloned());
        if !st.body_text.is_empty() {
            parts.push(st.body_text.clone());
        }
        Ok(parts.join("\n"))
    }

    async fn click(&self, el: &ElementHandle) -> Result<(), DriverError> {
        let role = self.role_of(&el.locator);
        let mut st = self.state();
        match role {
            Role::NewChat => {
                st.clicks.push("new_chat".to_string());
                st.open_new_conversation();
            }
            Role::ProjectLink => {
                let name = st.projects.get(el.index).cloned().ok_or_else(|| Self::stale(el))?;
                st.clicks.push(format!("project:{name}"));
                st.url = format!(
                    "https://chatgpt.com/g/g-p-{}/project",
                    name.to_lowercase().replace(' ', "-")
                );
                st.current_project = Some(name);
                st.open_new_conversation();
            }
            Role::ModelSwitcher => {
                st.clicks.push("model_switcher".to_string());
                st.menu_open = true;
            }
            Role::LegacyModels => {
                st.clicks.push("legacy_models".to_string());
                st.legacy_open = true;
            }
            Role::ModelOption => {
                let name = st
                    .model_options()
                    .get(el.index)
                    .cloned()
                    .ok_or_else(|| Self::stale(el))?;
                st.clicks.push(format!("model:{name}"));
                st.selected_model = Some(name);
                st.menu_open = false;
                st.legacy_open = false;
            }
            Role::StopButton => st.clicks.push("stop".to_string()),
            _ => st.clicks.push(el.locator.to_string()),
        }
        Ok(())
    }

    async fn focus_and_clear(&self, el: &ElementHandle) -> Result<(), DriverError> {
        let mut st = self.state();
        if !st.input_present {
            return Err(Self::stale(el));
        }
        st.input_value.clear();
        Ok(())
    }

    async fn insert_text(&self, el: &ElementHandle, text: &str) -> Result<(), DriverError> {
        let mut st = self.state();
        if !st.input_present {
            return Err(Self::stale(el));
        }
        st.input_value.push_str(text);
        Ok(())
    }

    async fn press_enter(&self, el: &ElementHandle) -> Result<(), DriverError> {
        let mut st = self.state();
        if !st.input_present {
            return Err(Self::stale(el));
        }
        let prompt = std::mem::take(&mut st.input_value);
        st.apply_submission(prompt);
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        let mut st = self.state();
        st.url = url.to_string();
        st.open_new_conversation();
        Ok(())
    }

    async fn reload(&self) -> Result<(), DriverError> {
        let mut st = self.state();
        st.reloads += 1;
        // 重新加载后临时错误横幅消失
        st.body_text.clear();
        st.dialogs.clear();
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.state().url.clone())
    }
}
