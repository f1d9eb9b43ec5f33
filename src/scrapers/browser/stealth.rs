//! Automation fingerprint patches evaluated in each rendered page.

/// Build the patch scripts for a session advertising `languages`.
pub fn stealth_scripts(languages: &[String]) -> Vec<String> {
    let languages = if languages.is_empty() {
        vec!["en-IN".to_string(), "en".to_string()]
    } else {
        languages.to_vec()
    };
    let languages_json = serde_json::to_string(&languages).unwrap_or_else(|_| "[]".to_string());

    vec![
        r#"Object.defineProperty(navigator, 'webdriver', { get: () => undefined, configurable: true });"#
            .to_string(),
        format!(
            "Object.defineProperty(navigator, 'languages', {{ get: () => {}, configurable: true }});",
            languages_json
        ),
        r#"if (!window.chrome) { window.chrome = { runtime: {}, loadTimes: function() {}, csi: function() {}, app: {} }; }"#
            .to_string(),
        r#"Object.defineProperty(navigator, 'plugins', {
            get: () => [
                { name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer', description: 'Portable Document Format' },
                { name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai', description: '' }
            ],
            configurable: true
        });"#
            .to_string(),
        r#"if (window.navigator.permissions) {
            const query = window.navigator.permissions.query;
            window.navigator.permissions.query = (p) => (
                p.name === 'notifications' ? Promise.resolve({ state: Notification.permission }) : query(p)
            );
        }"#
        .to_string(),
    ]
}
