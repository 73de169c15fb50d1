use std::collections::HashMap;
use std::sync::RwLock;

/// 类加载资源缓存
///
/// 提供方通道推送的资源存于此处，请求方通道按名称查询。
/// 锁只在单次读写期间持有。
#[derive(Debug, Default)]
pub struct ResourceCache {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: String, data: Vec<u8>) {
        self.entries
            .write()
            .expect("资源缓存锁中毒")
            .insert(name, data);
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.entries
            .read()
            .expect("资源缓存锁中毒")
            .get(name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("资源缓存锁中毒").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
