use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use config::AppConfig;

/// 刷新令牌 Cookie 的属性。名称、路径与有效期来自配置，生产环境额外带 `Secure`。
#[derive(Debug, Clone)]
pub struct RefreshCookie {
    name: String,
    path: String,
    secure: bool,
    max_age: time::Duration,
}

impl RefreshCookie {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            name: config.session.cookie_name.clone(),
            path: config.session.cookie_path.clone(),
            secure: config.environment.is_production(),
            max_age: time::Duration::days(config.session.refresh_token_ttl_days),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn build(&self, value: String) -> Cookie<'static> {
        Cookie::build((self.name.clone(), value))
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .path(self.path.clone())
            .max_age(self.max_age)
            .build()
    }

    pub fn set(&self, jar: CookieJar, token: &str) -> CookieJar {
        jar.add(self.build(token.to_owned()))
    }

    /// 无论请求里有没有这个 Cookie，都下发一个立即过期的同名 Cookie。
    pub fn clear(&self, jar: CookieJar) -> CookieJar {
        let mut cookie = self.build(String::new());
        cookie.make_removal();
        jar.add(cookie)
    }

    pub fn read(&self, jar: &CookieJar) -> Option<String> {
        jar.get(&self.name).map(|cookie| cookie.value().to_owned())
    }
}
