use serde_json::json;

pub const NAVIGATE: &str = "navigate";
pub const CHANGE_THEME: &str = "changeTheme";
pub const TOGGLE_AUTO_SCROLL: &str = "toggleAutoScroll";
pub const SET_ACCENT_COLOR: &str = "setAccentColor";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FunctionDeclaration {
    /// The name of the function
    name: String,

    /// The description of the function
    description: String,

    /// The parameters of the function in OpenAPI schema format
    parameters: serde_json::Value,
}

impl FunctionDeclaration {
    pub fn new(name: &str, description: &str, parameters: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }

    /// A declaration taking exactly one required string argument.
    pub fn with_string_arg(name: &str, description: &str, arg: &str, arg_description: &str) -> Self {
        Self::new(
            name,
            description,
            json!({
                "type": "OBJECT",
                "properties": {
                    arg: { "type": "STRING", "description": arg_description }
                },
                "required": [arg],
            }),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &serde_json::Value {
        &self.parameters
    }
}

/// The actions the voice model may take on the site.
pub fn site_control_tools() -> Vec<FunctionDeclaration> {
    vec![
        FunctionDeclaration::with_string_arg(
            NAVIGATE,
            "Navigate to a specific page on the website. Use this when the user asks to go to Home, About, Showcase (products), Offerings (services), or Contact.",
            "page",
            "The page path. Must be one of: \"/\", \"/about\", \"/showcase\", \"/offerings\", \"/contact\".",
        ),
        FunctionDeclaration::with_string_arg(
            CHANGE_THEME,
            "Change the website theme between light and dark mode.",
            "mode",
            "The theme mode: \"light\" or \"dark\".",
        ),
        FunctionDeclaration::with_string_arg(
            TOGGLE_AUTO_SCROLL,
            "Start or stop the auto-scrolling feature.",
            "action",
            "\"start\" or \"stop\"",
        ),
        FunctionDeclaration::with_string_arg(
            SET_ACCENT_COLOR,
            "Change the main accent color of the website.",
            "color",
            "The color hex code or name (e.g., #ff0000, red, blue).",
        ),
    ]
}
