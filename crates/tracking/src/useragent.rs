//! User-Agent 解析：操作系统、浏览器、设备类型与爬虫识别

pub const OS_WINDOWS: &str = "Windows";
pub const OS_MAC: &str = "Mac";
pub const OS_LINUX: &str = "Linux";
pub const OS_CHROME_OS: &str = "Chrome OS";
pub const OS_ANDROID: &str = "Android";
pub const OS_IOS: &str = "iOS";
pub const OS_WINDOWS_PHONE: &str = "Windows Phone";

pub const BROWSER_CHROME: &str = "Chrome";
pub const BROWSER_FIREFOX: &str = "Firefox";
pub const BROWSER_SAFARI: &str = "Safari";
pub const BROWSER_OPERA: &str = "Opera";
pub const BROWSER_EDGE: &str = "Edge";
pub const BROWSER_IE: &str = "IE";

/// 小写匹配
const BOT_KEYWORDS: &[&str] = &[
    "bot",
    "crawl",
    "spider",
    "slurp",
    "scrape",
    "archiver",
    "facebookexternalhit",
    "embedly",
    "headless",
    "lighthouse",
    "pingdom",
    "monitor",
    "preview",
    "curl",
    "wget",
    "python",
    "java/",
    "go-http-client",
    "okhttp",
    "axios",
    "http://",
    "https://",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserAgent {
    pub os: String,
    pub os_version: String,
    pub browser: String,
    pub browser_version: String,
    pub desktop: bool,
    pub mobile: bool,
}

pub fn is_bot(user_agent: &str) -> bool {
    let ua = user_agent.to_lowercase();
    BOT_KEYWORDS.iter().any(|keyword| ua.contains(keyword))
}

pub fn parse(user_agent: &str) -> UserAgent {
    let (os, os_version) = parse_os(user_agent);
    let (browser, browser_version) = parse_browser(user_agent);

    let mobile = matches!(os, OS_ANDROID | OS_IOS | OS_WINDOWS_PHONE) || user_agent.contains("Mobile");
    let desktop = !mobile && matches!(os, OS_WINDOWS | OS_MAC | OS_LINUX | OS_CHROME_OS);

    UserAgent {
        os: os.to_string(),
        os_version,
        browser: browser.to_string(),
        browser_version,
        desktop,
        mobile,
    }
}

fn parse_os(ua: &str) -> (&'static str, String) {
    if let Some(version) = version_after(ua, "Windows Phone ") {
        return (OS_WINDOWS_PHONE, version);
    }
    if let Some(nt) = version_after(ua, "Windows NT ") {
        let version = match nt.as_str() {
            "10.0" => "10",
            "6.3" => "8.1",
            "6.2" => "8",
            "6.1" => "7",
            "6.0" => "Vista",
            "5.1" | "5.2" => "XP",
            other => other,
        };
        return (OS_WINDOWS, version.to_string());
    }
    if ua.contains("Windows") {
        return (OS_WINDOWS, String::new());
    }
    if let Some(version) = version_after(ua, "Android ") {
        return (OS_ANDROID, version);
    }
    if ua.contains("Android") {
        return (OS_ANDROID, String::new());
    }
    if ua.contains("iPhone") || ua.contains("iPad") || ua.contains("iPod") {
        let version = version_after(ua, "iPhone OS ")
            .or_else(|| version_after(ua, "CPU OS "))
            .unwrap_or_default();
        return (OS_IOS, version.replace('_', "."));
    }
    if let Some(version) = version_after(ua, "Mac OS X ") {
        return (OS_MAC, version.replace('_', "."));
    }
    if ua.contains("Macintosh") {
        return (OS_MAC, String::new());
    }
    if ua.contains("CrOS") {
        return (OS_CHROME_OS, String::new());
    }
    if ua.contains("Linux") || ua.contains("X11") {
        return (OS_LINUX, String::new());
    }

    ("", String::new())
}

fn parse_browser(ua: &str) -> (&'static str, String) {
    let candidates: [(&str, &'static str); 8] = [
        ("Edg/", BROWSER_EDGE),
        ("Edge/", BROWSER_EDGE),
        ("OPR/", BROWSER_OPERA),
        ("Opera/", BROWSER_OPERA),
        ("Firefox/", BROWSER_FIREFOX),
        ("FxiOS/", BROWSER_FIREFOX),
        ("CriOS/", BROWSER_CHROME),
        ("Chrome/", BROWSER_CHROME),
    ];

    for (token, browser) in candidates {
        if let Some(version) = version_after(ua, token) {
            return (browser, version);
        }
    }

    if ua.contains("Safari/") {
        return (BROWSER_SAFARI, version_after(ua, "Version/").unwrap_or_default());
    }
    if let Some(version) = version_after(ua, "MSIE ") {
        return (BROWSER_IE, version);
    }
    if ua.contains("Trident/") {
        return (BROWSER_IE, version_after(ua, "rv:").unwrap_or_default());
    }

    ("", String::new())
}

/// `token` 之后直到分隔符的版本号
fn version_after(ua: &str, token: &str) -> Option<String> {
    let start = ua.find(token)? + token.len();
    let version: String = ua[start..]
        .chars()
        .take_while(|c| !matches!(c, ' ' | ';' | ')' | '('))
        .collect();
    Some(version)
}
