//! Embedded Lua for the two writes that need a conditional mutated
//! atomically with a TTL check in one round trip: a hot key must not be
//! immortalized by a fresh `EXPIRE` on every write, but a cold key that
//! has never had a TTL applied needs one exactly once.

use redis::Script;

const SUBSCRIBE_SRC: &str = r"
local subs_key = KEYS[1]
local chan_key = KEYS[2]
local meta_key = KEYS[3]
local patterns_key = KEYS[4]
local channel = ARGV[1]
local client_id = ARGV[2]
local is_pattern = ARGV[3]
local subscribed_at = ARGV[4]
local ttl = tonumber(ARGV[5])

redis.call('SADD', subs_key, channel)
redis.call('SADD', chan_key, client_id)
redis.call('HSET', meta_key, 'subscribed_at', subscribed_at, 'channel', channel, 'client_id', client_id)
if is_pattern == '1' then
    redis.call('SADD', patterns_key, channel)
end

if redis.call('TTL', subs_key) == -1 then redis.call('EXPIRE', subs_key, ttl) end
if redis.call('TTL', chan_key) == -1 then redis.call('EXPIRE', chan_key, ttl) end
if redis.call('TTL', meta_key) == -1 then redis.call('EXPIRE', meta_key, ttl) end
if is_pattern == '1' and redis.call('TTL', patterns_key) == -1 then
    redis.call('EXPIRE', patterns_key, ttl)
end

return 1
";

const ENQUEUE_SRC: &str = r"
local queue_key = KEYS[1]
local payload = ARGV[1]
local ttl = tonumber(ARGV[2])

redis.call('RPUSH', queue_key, payload)
if redis.call('TTL', queue_key) == -1 then redis.call('EXPIRE', queue_key, ttl) end

return 1
";

const BATCH_ENQUEUE_SRC: &str = r"
local payload = ARGV[1]
local ttl = tonumber(ARGV[2])

for i, queue_key in ipairs(KEYS) do
    redis.call('RPUSH', queue_key, payload)
    if redis.call('TTL', queue_key) == -1 then redis.call('EXPIRE', queue_key, ttl) end
end

return #KEYS
";

/// Atomically: SADD both sides of the subscription graph, write the
/// diagnostic meta hash, optionally add the pattern set membership, and
/// apply `subscription_ttl` to each touched key only if it has no TTL yet.
#[must_use]
pub fn subscribe_script() -> Script {
    Script::new(SUBSCRIBE_SRC)
}

/// Atomically: RPUSH the encoded message and apply `message_ttl` to the
/// list only if it has no TTL yet (i.e. only on the first enqueue into an
/// empty queue).
#[must_use]
pub fn enqueue_script() -> Script {
    Script::new(ENQUEUE_SRC)
}

/// The same RPUSH + EXPIRE-if-absent as [`enqueue_script`], applied to
/// every key in one round trip — the batched fan-out write the Engine's
/// publish path uses to enqueue one message for a whole subscriber
/// snapshot atomically.
#[must_use]
pub fn batch_enqueue_script() -> Script {
    Script::new(BATCH_ENQUEUE_SRC)
}
