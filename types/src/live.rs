//! Messages exchanged over the Gemini Live bidirectional websocket.

use crate::chat::Content;
use crate::tools::FunctionDeclaration;

/// Audio data encoded as base64
pub type Base64EncodedAudioBytes = String;

pub const INPUT_AUDIO_MIME_TYPE: &str = "audio/pcm;rate=16000";

// Outgoing messages

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    model: String,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSet>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSet {
    function_declarations: Vec<FunctionDeclaration>,
}

pub struct SetupBuilder {
    setup: Setup,
}

impl SetupBuilder {
    pub fn new(model: &str) -> Self {
        // The Live endpoint expects a fully qualified model resource name.
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };
        Self {
            setup: Setup {
                model,
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: None,
                },
                system_instruction: None,
                tools: vec![],
            },
        }
    }

    pub fn with_voice(mut self, voice_name: &str) -> Self {
        self.setup.generation_config.speech_config = Some(SpeechConfig {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig {
                    voice_name: voice_name.to_string(),
                },
            },
        });
        self
    }

    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.setup.system_instruction = Some(Content::instruction(instructions));
        self
    }

    pub fn with_tools(mut self, function_declarations: Vec<FunctionDeclaration>) -> Self {
        self.setup.tools = vec![ToolSet {
            function_declarations,
        }];
        self
    }

    pub fn build(self) -> Setup {
        self.setup
    }
}

impl Setup {
    pub fn builder(model: &str) -> SetupBuilder {
        SetupBuilder::new(model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn function_declarations(&self) -> impl Iterator<Item = &FunctionDeclaration> {
        self.tools.iter().flat_map(|t| t.function_declarations.iter())
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    media_chunks: Vec<Blob>,
}

impl RealtimeInput {
    pub fn audio(data: Base64EncodedAudioBytes) -> Self {
        Self {
            media_chunks: vec![Blob {
                mime_type: INPUT_AUDIO_MIME_TYPE.to_string(),
                data,
            }],
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    function_responses: Vec<FunctionResponse>,
}

impl ToolResponse {
    pub fn single(response: FunctionResponse) -> Self {
        Self {
            function_responses: vec![response],
        }
    }

    pub fn function_responses(&self) -> &[FunctionResponse] {
        &self.function_responses
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FunctionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: ToolResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ToolResult {
    pub result: ToolOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ToolOutcome {
    Success,
    Failed,
}

// Incoming messages

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub tool_call: Option<ToolCall>,
    #[serde(default)]
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

impl ServerMessage {
    /// Base64 PCM payloads carried by the model turn, in order.
    pub fn audio_chunks(&self) -> Vec<&str> {
        self.server_content
            .iter()
            .flat_map(|c| c.model_turn.iter())
            .flat_map(|t| t.parts.iter())
            .filter_map(|p| p.inline_data.as_ref())
            .filter(|b| b.mime_type.starts_with("audio/"))
            .map(|b| b.data.as_str())
            .collect()
    }

    pub fn turn_complete(&self) -> bool {
        self.server_content
            .as_ref()
            .is_some_and(|c| c.turn_complete)
    }

    pub fn interrupted(&self) -> bool {
        self.server_content.as_ref().is_some_and(|c| c.interrupted)
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<ServerPart>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerPart {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub inline_data: Option<Blob>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}
