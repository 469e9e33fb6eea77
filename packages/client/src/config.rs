//! Client configuration.

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Service name of the server to join
    pub service: String,
    /// Display name announced to other clients
    pub name: String,
    /// Enables `%who` and `%last N`, which read the server's activity log
    pub advanced: bool,
}

impl ClientConfig {
    pub fn new(service: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            name: name.into(),
            advanced: false,
        }
    }

    /// Prompt shown by the line editor.
    pub fn prompt(&self) -> String {
        format!("{}>> ", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_uses_name() {
        // テスト項目: プロンプトは名前の後ろに >> を付けたもの
        // given (前提条件):
        let config = ClientConfig::new("lobby", "alice");

        // when (操作):
        let prompt = config.prompt();

        // then (期待する結果):
        assert_eq!(prompt, "alice>> ");
        assert!(!config.advanced);
    }
}
