use super::message::{ActionRow, MessagePayload};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    String(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
    User(String),
    Channel(String),
    Role(String),
}

impl OptionValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::String(s)
            | OptionValue::User(s)
            | OptionValue::Channel(s)
            | OptionValue::Role(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            OptionValue::Integer(i) => Some(*i),
            OptionValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandOption {
    pub name: String,
    pub value: OptionValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InteractionData {
    Command {
        name: String,
        options: Vec<CommandOption>,
    },
    Component {
        custom_id: String,
        values: Vec<String>,
    },
    Autocomplete {
        name: String,
        focused: String,
        value: String,
    },
    ModalSubmit {
        custom_id: String,
        fields: HashMap<String, String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    pub id: String,
    pub token: String,
    pub guild_id: Option<String>,
    pub channel_id: String,
    pub user_id: String,
    pub user_name: String,
    pub member_roles: Vec<String>,
    /// Message the component is attached to.
    pub message_id: Option<String>,
    pub data: InteractionData,
}

impl Interaction {
    pub fn handle(&self) -> InteractionHandle {
        InteractionHandle {
            id: self.id.clone(),
            token: self.token.clone(),
        }
    }

    pub fn option(&self, name: &str) -> Option<&OptionValue> {
        match &self.data {
            InteractionData::Command { options, .. } => {
                options.iter().find(|o| o.name == name).map(|o| &o.value)
            }
            _ => None,
        }
    }

    pub fn str_option(&self, name: &str) -> Option<&str> {
        self.option(name).and_then(|v| v.as_str())
    }

    pub fn int_option(&self, name: &str) -> Option<i64> {
        self.option(name).and_then(|v| v.as_i64())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionHandle {
    pub id: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextInputSpec {
    pub custom_id: String,
    pub label: String,
    pub long: bool,
    pub required: bool,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModalSpec {
    pub custom_id: String,
    pub title: String,
    pub inputs: Vec<TextInputSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InteractionResponse {
    Message {
        payload: MessagePayload,
        ephemeral: bool,
    },
    UpdateMessage(MessagePayload),
    Modal(ModalSpec),
    Autocomplete(Vec<Choice>),
}

impl InteractionResponse {
    pub fn ephemeral(content: impl Into<String>) -> Self {
        InteractionResponse::Message {
            payload: MessagePayload::text(content),
            ephemeral: true,
        }
    }

    pub fn components(&self) -> &[ActionRow] {
        match self {
            InteractionResponse::Message { payload, .. } | InteractionResponse::UpdateMessage(payload) => {
                &payload.components
            }
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    String,
    Integer,
    Boolean,
    User,
    Channel,
    Role,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOptionSpec {
    pub name: String,
    pub description: String,
    pub kind: OptionKind,
    pub required: bool,
    pub autocomplete: bool,
    pub choices: Vec<Choice>,
}

impl CommandOptionSpec {
    pub fn new(kind: OptionKind, name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            kind,
            required: false,
            autocomplete: false,
            choices: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn autocomplete(mut self) -> Self {
        self.autocomplete = true;
        self
    }

    pub fn choice(mut self, name: &str, value: &str) -> Self {
        self.choices.push(Choice {
            name: name.to_string(),
            value: value.to_string(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: String,
    pub description: String,
    pub options: Vec<CommandOptionSpec>,
}

impl CommandSpec {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            options: Vec::new(),
        }
    }

    pub fn option(mut self, option: CommandOptionSpec) -> Self {
        self.options.push(option);
        self
    }
}
