use crate::gateway::{Gateway, StatsSnapshot};

pub fn gateway_stats(gateway: &Gateway) -> StatsSnapshot {
    gateway.stats()
}

pub fn format_stats(stats: &StatsSnapshot) -> String {
    format!(
        "clients_accepted={}\n\
         servers_accepted={}\n\
         auth_failures={}\n\
         live_clients={}\n\
         live_servers={}\n\
         live_virtual={}\n\
         virtual_opened={}\n\
         virtual_rejected={}\n\
         virtual_closed={}\n\
         frames_relayed={}\n\
         bytes_relayed={}\n\
         slow_consumers={}\n\
         heartbeat_timeouts={}",
        stats.clients_accepted,
        stats.servers_accepted,
        stats.auth_failures,
        stats.live_clients,
        stats.live_servers,
        stats.live_virtual,
        stats.virtual_opened,
        stats.virtual_rejected,
        stats.virtual_closed,
        stats.frames_relayed,
        stats.bytes_relayed,
        stats.slow_consumers,
        stats.heartbeat_timeouts,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_counter_per_line() {
        let stats = StatsSnapshot {
            frames_relayed: 3,
            live_servers: 1,
            ..StatsSnapshot::default()
        };

        let out = format_stats(&stats);
        assert_eq!(out.lines().count(), 13);
        assert!(out.contains("frames_relayed=3"));
        assert!(out.contains("live_servers=1"));
    }
}
