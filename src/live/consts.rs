pub const BASE_URL: &str = "wss://generativelanguage.googleapis.com";
pub const LIVE_PATH: &str =
    "ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";
pub const DEFAULT_VOICE: &str = "Kore";

pub const API_KEY_PARAM: &str = "key";
