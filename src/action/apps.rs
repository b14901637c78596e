//! Known app display names and their package identifiers.

/// (display name, package) pairs understood by `Launch`.
pub const APP_PACKAGES: &[(&str, &str)] = &[
    ("微信", "com.tencent.mm"),
    ("WeChat", "com.tencent.mm"),
    ("QQ", "com.tencent.mobileqq"),
    ("支付宝", "com.eg.android.AlipayGphone"),
    ("淘宝", "com.taobao.taobao"),
    ("京东", "com.jingdong.app.mall"),
    ("美团", "com.sankuai.meituan"),
    ("大众点评", "com.dianping.v1"),
    ("拼多多", "com.xunmeng.pinduoduo"),
    ("小红书", "com.xingin.xhs"),
    ("抖音", "com.ss.android.ugc.aweme"),
    ("快手", "com.smile.gifmaker"),
    ("哔哩哔哩", "tv.danmaku.bili"),
    ("知乎", "com.zhihu.android"),
    ("微博", "com.sina.weibo"),
    ("高德地图", "com.autonavi.minimap"),
    ("百度地图", "com.baidu.BaiduMap"),
    ("网易云音乐", "com.netease.cloudmusic"),
    ("QQ音乐", "com.tencent.qqmusic"),
    ("携程旅行", "ctrip.android.view"),
    ("12306", "com.MobileTicket"),
    ("Settings", "com.android.settings"),
    ("设置", "com.android.settings"),
    ("Chrome", "com.android.chrome"),
    ("Google", "com.google.android.googlequicksearchbox"),
    ("Google Maps", "com.google.android.apps.maps"),
    ("Gmail", "com.google.android.gm"),
    ("YouTube", "com.google.android.youtube"),
    ("YouTube Music", "com.google.android.apps.youtube.music"),
    ("Telegram", "org.telegram.messenger"),
    ("WhatsApp", "com.whatsapp"),
    ("Camera", "com.android.camera"),
    ("相机", "com.android.camera"),
    ("Clock", "com.android.deskclock"),
    ("时钟", "com.android.deskclock"),
    ("Calculator", "com.android.calculator2"),
    ("计算器", "com.android.calculator2"),
    ("Contacts", "com.android.contacts"),
    ("Files", "com.google.android.documentsui"),
];

/// Package identifier for an exact display name.
pub fn app_package(name: &str) -> Option<&'static str> {
    APP_PACKAGES
        .iter()
        .find(|(app, _)| *app == name)
        .map(|(_, package)| *package)
}

/// Finds the longest catalog name occurring anywhere in `text`, so that
/// "Google Maps" wins over "Google".
pub fn infer_app_name(text: &str) -> Option<&'static str> {
    APP_PACKAGES
        .iter()
        .map(|(name, _)| *name)
        .filter(|name| !name.is_empty() && text.contains(name))
        .max_by_key(|name| name.chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_name_wins() {
        assert_eq!(infer_app_name("open YouTube Music now"), Some("YouTube Music"));
        assert_eq!(infer_app_name("open YouTube"), Some("YouTube"));
    }

    #[test]
    fn no_match_yields_none() {
        assert_eq!(infer_app_name("do something"), None);
    }

    #[test]
    fn looks_up_packages() {
        assert_eq!(app_package("微信"), Some("com.tencent.mm"));
        assert_eq!(app_package("Nope"), None);
    }
}
