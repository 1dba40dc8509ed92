use netsync::SyncConfig;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub sync: SyncConfig,
    pub max_clients: usize,
    pub npc_count: usize,
    /// Half-extent of the square NPCs wander in.
    pub world_extent: f32,
    pub npc_speed: f32,
    pub attack_radius: f32,
    pub attack_damage: f32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            max_clients: 32,
            npc_count: 64,
            world_extent: 150.0,
            npc_speed: 3.0,
            attack_radius: 1.0,
            attack_damage: 10.0,
        }
    }
}
