//! Script bodies for the server-side primitive protocols (spec §4.6).
//! Treated as part of the core contract per §9's open question: any
//! change here must preserve each script's atomic boundary exactly, and
//! the `922337203685477` sentinel in [`SEMAPHORE_ACQUIRE`] must never be
//! altered since client code compares against the same literal.

/// `KEYS[1]` = lock key, `ARGV[1]` = holder id, `ARGV[2]` = lease ms.
/// Returns `nil` on success, or the current holder's remaining PTTL.
pub const LOCK_ACQUIRE: &str = r#"
if redis.call('exists', KEYS[1]) == 0 then
    redis.call('hset', KEYS[1], ARGV[1], 1)
    redis.call('pexpire', KEYS[1], ARGV[2])
    return nil
elseif redis.call('hexists', KEYS[1], ARGV[1]) == 1 then
    redis.call('hincrby', KEYS[1], ARGV[1], 1)
    redis.call('pexpire', KEYS[1], ARGV[2])
    return nil
else
    return redis.call('pttl', KEYS[1])
end
"#;

/// `KEYS[1]` = lock key, `KEYS[2]` = wake channel, `ARGV[1]` = holder id,
/// `ARGV[2]` = wake payload. Returns 1 if the lock was fully released.
pub const LOCK_RELEASE: &str = r#"
if redis.call('hexists', KEYS[1], ARGV[1]) == 0 then
    return 0
end
local count = redis.call('hincrby', KEYS[1], ARGV[1], -1)
if count <= 0 then
    redis.call('del', KEYS[1])
    redis.call('publish', KEYS[2], ARGV[2])
    return 1
end
return 0
"#;

/// `KEYS[1]` = lock key, `ARGV[1]` = holder id, `ARGV[2]` = lease ms.
/// Refreshes the lease only if `holderId` still owns it; returns 0 if a
/// different (or no) holder now owns the key, so the watchdog can stop.
pub const LOCK_WATCHDOG_REFRESH: &str = r#"
if redis.call('hexists', KEYS[1], ARGV[1]) == 1 then
    redis.call('pexpire', KEYS[1], ARGV[2])
    return 1
end
return 0
"#;

/// `KEYS[1]` = lock key, `KEYS[2]` = waiters queue (list), `KEYS[3]` =
/// timeouts sorted set, `ARGV[1]` = holder id, `ARGV[2]` = lease ms,
/// `ARGV[3]` = now (ms), `ARGV[4]` = arrival timeout deadline (ms).
/// Returns `nil` on success, else the caller's remaining wait time in ms.
pub const FAIR_LOCK_ACQUIRE: &str = r#"
redis.call('zremrangebyscore', KEYS[3], '-inf', ARGV[3])
while true do
    local head = redis.call('lindex', KEYS[2], 0)
    if head == false then break end
    if redis.call('zscore', KEYS[3], head) then break end
    redis.call('lpop', KEYS[2])
end

local exists = redis.call('exists', KEYS[1]) == 1
local head = redis.call('lindex', KEYS[2], 0)

if not exists and (head == false or head == ARGV[1]) then
    redis.call('hset', KEYS[1], ARGV[1], 1)
    redis.call('pexpire', KEYS[1], ARGV[2])
    if head == ARGV[1] then
        redis.call('lpop', KEYS[2])
        redis.call('zrem', KEYS[3], ARGV[1])
    end
    return nil
elseif exists and redis.call('hexists', KEYS[1], ARGV[1]) == 1 then
    redis.call('hincrby', KEYS[1], ARGV[1], 1)
    redis.call('pexpire', KEYS[1], ARGV[2])
    return nil
else
    if redis.call('zscore', KEYS[3], ARGV[1]) == false then
        redis.call('rpush', KEYS[2], ARGV[1])
        redis.call('zadd', KEYS[3], ARGV[4], ARGV[1])
    end
    return redis.call('pttl', KEYS[1])
end
"#;

/// `KEYS[1]` = lock key, `KEYS[2]` = waiters queue, `KEYS[3]` = timeouts
/// sorted set, `KEYS[4]` = wake channel, `ARGV[1]` = holder id, `ARGV[2]`
/// = wake payload.
pub const FAIR_LOCK_RELEASE: &str = r#"
if redis.call('hexists', KEYS[1], ARGV[1]) == 0 then
    return 0
end
local count = redis.call('hincrby', KEYS[1], ARGV[1], -1)
if count <= 0 then
    redis.call('del', KEYS[1])
    redis.call('lrem', KEYS[2], 0, ARGV[1])
    redis.call('zrem', KEYS[3], ARGV[1])
    redis.call('publish', KEYS[4], ARGV[2])
    return 1
end
return 0
"#;

/// The magic sentinel the original implementation uses to mark a permit's
/// lease deadline as "never expires". Scripts compare `ARGV[5]` against
/// this literal; it must not change.
pub const SEMAPHORE_NON_EXPIRING_DEADLINE: &str = "922337203685477";

/// `KEYS[1]` = free-permits counter, `KEYS[2]` = permit deadlines sorted
/// set, `KEYS[3]` = wake channel, `ARGV[1]` = requested count, `ARGV[2]`
/// = now (ms), `ARGV[3]` = new permit id, `ARGV[4]` = lease ms (or the
/// non-expiring sentinel), `ARGV[5]` = absolute deadline for the new
/// permit (`now + lease`, or the sentinel). Returns `nil`+permit id
/// encoded as the permit id bulk string on success, or `":"+deadline`
/// when the caller should wait exactly until the earliest reclaim.
pub const SEMAPHORE_ACQUIRE: &str = r#"
local reclaimed = redis.call('zrangebyscore', KEYS[2], '-inf', ARGV[2])
if #reclaimed > 0 then
    redis.call('zremrangebyscore', KEYS[2], '-inf', ARGV[2])
    redis.call('incrby', KEYS[1], #reclaimed)
    redis.call('publish', KEYS[3], redis.call('get', KEYS[1]))
end

local free = tonumber(redis.call('get', KEYS[1]) or '0')
if free >= tonumber(ARGV[1]) then
    redis.call('decrby', KEYS[1], ARGV[1])
    redis.call('zadd', KEYS[2], ARGV[5], ARGV[3])
    return ARGV[3]
else
    local nearest = redis.call('zrange', KEYS[2], 0, 0, 'WITHSCORES')
    if #nearest == 2 then
        return ':' .. nearest[2]
    end
    return ':' .. ARGV[2]
end
"#;

/// Seeds the free-permits counter, but only if it hasn't been initialized
/// yet — mirrors `RSemaphore.trySetPermits`. `KEYS[1]` = free-permits
/// counter, `ARGV[1]` = total permits. Returns `1` if the counter was set,
/// `0` if it already existed.
pub const SEMAPHORE_TRY_SET_PERMITS: &str = r#"
if redis.call('exists', KEYS[1]) == 1 then
    return 0
end
redis.call('set', KEYS[1], ARGV[1])
return 1
"#;

/// `KEYS[1]` = free-permits counter, `KEYS[2]` = permit deadlines sorted
/// set, `KEYS[3]` = wake channel, `ARGV[1]` = permit id.
pub const SEMAPHORE_RELEASE: &str = r#"
if redis.call('zscore', KEYS[2], ARGV[1]) == false then
    return 0
end
redis.call('zrem', KEYS[2], ARGV[1])
redis.call('incr', KEYS[1])
redis.call('publish', KEYS[3], redis.call('get', KEYS[1]))
return 1
"#;

/// Token-bucket rate limiter. `KEYS[1]` = bucket hash (`tokens`,
/// `lastRefill`), `ARGV[1]` = max tokens, `ARGV[2]` = tokens per ms,
/// `ARGV[3]` = now (ms), `ARGV[4]` = requested tokens. Returns `nil` on
/// acceptance or the shortfall's wait time in ms.
pub const RATE_LIMITER_ACQUIRE: &str = r#"
local max = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local requested = tonumber(ARGV[4])

local stored = tonumber(redis.call('hget', KEYS[1], 'tokens') or tostring(max))
local last = tonumber(redis.call('hget', KEYS[1], 'lastRefill') or tostring(now))

local tokens = math.min(max, stored + rate * math.max(0, now - last))
if tokens >= requested then
    redis.call('hset', KEYS[1], 'tokens', tokens - requested, 'lastRefill', now)
    return nil
else
    local shortfall = requested - tokens
    local wait_ms = math.ceil(shortfall / rate)
    redis.call('hset', KEYS[1], 'tokens', tokens, 'lastRefill', now)
    return wait_ms
end
"#;

/// Map-cache eviction sweep (run periodically by C8). `KEYS[1]` = data
/// hash, `KEYS[2]` = ttl sorted set, `KEYS[3]` = idle sorted set,
/// `KEYS[4]` = expired-keys event channel, `ARGV[1]` = now (ms). Removes
/// every field whose ttl or idle deadline has passed and republishes one
/// event per evicted field.
pub const MAP_CACHE_EVICT: &str = r#"
local ttl_expired = redis.call('zrangebyscore', KEYS[2], '-inf', ARGV[1])
local idle_expired = redis.call('zrangebyscore', KEYS[3], '-inf', ARGV[1])
local seen = {}
local evicted = {}
for _, field in ipairs(ttl_expired) do seen[field] = true end
for _, field in ipairs(idle_expired) do seen[field] = true end
for field, _ in pairs(seen) do
    redis.call('hdel', KEYS[1], field)
    redis.call('zrem', KEYS[2], field)
    redis.call('zrem', KEYS[3], field)
    redis.call('publish', KEYS[4], field)
    table.insert(evicted, field)
end
return evicted
"#;

/// Reads a field, treating it as absent if its ttl or idle deadline has
/// already passed, and otherwise refreshing its idle deadline. `KEYS[1]`
/// = data hash, `KEYS[2]` = ttl sorted set, `KEYS[3]` = idle sorted set,
/// `ARGV[1]` = field, `ARGV[2]` = now (ms), `ARGV[3]` = new idle deadline.
pub const MAP_CACHE_GET: &str = r#"
local ttl_score = redis.call('zscore', KEYS[2], ARGV[1])
local idle_score = redis.call('zscore', KEYS[3], ARGV[1])
local now = tonumber(ARGV[2])
if (ttl_score and tonumber(ttl_score) <= now) or (idle_score and tonumber(idle_score) <= now) then
    redis.call('hdel', KEYS[1], ARGV[1])
    redis.call('zrem', KEYS[2], ARGV[1])
    redis.call('zrem', KEYS[3], ARGV[1])
    return false
end
local value = redis.call('hget', KEYS[1], ARGV[1])
if value then
    redis.call('zadd', KEYS[3], ARGV[3], ARGV[1])
end
return value
"#;

/// Writes a field and resets both ttl and idle scores. `KEYS[1]` = data
/// hash, `KEYS[2]` = ttl sorted set, `KEYS[3]` = idle sorted set,
/// `ARGV[1]` = field, `ARGV[2]` = value, `ARGV[3]` = ttl deadline,
/// `ARGV[4]` = idle deadline.
pub const MAP_CACHE_PUT: &str = r#"
redis.call('hset', KEYS[1], ARGV[1], ARGV[2])
redis.call('zadd', KEYS[2], ARGV[3], ARGV[1])
redis.call('zadd', KEYS[3], ARGV[4], ARGV[1])
return 1
"#;

/// Atomically moves due scheduler entries into the live work list and
/// republishes the next earliest score. `KEYS[1]` = scheduler sorted set,
/// `KEYS[2]` = live work list, `KEYS[3]` = scheduler wake channel,
/// `ARGV[1]` = now (ms).
pub const SCHEDULER_QUEUE_TRANSFER: &str = r#"
local due = redis.call('zrangebyscore', KEYS[1], '-inf', ARGV[1])
for _, task_id in ipairs(due) do
    redis.call('zrem', KEYS[1], task_id)
    redis.call('rpush', KEYS[2], task_id)
end
local next_entry = redis.call('zrange', KEYS[1], 0, 0, 'WITHSCORES')
if #next_entry == 2 then
    redis.call('publish', KEYS[3], next_entry[2])
end
return due
"#;

/// Cancels a scheduled or live task atomically. `KEYS[1]` = scheduler
/// sorted set, `KEYS[2]` = live work list, `KEYS[3]` = task hash,
/// `KEYS[4]` = per-task cancel-request flag, `ARGV[1]` = task id.
/// Returns 1 if the task existed in the scheduler or live list, else 0
/// (in which case the cancel-request flag is still set, for a task that
/// was already dispatched to a worker).
pub const SCHEDULER_QUEUE_CANCEL: &str = r#"
local removed_scheduled = redis.call('zrem', KEYS[1], ARGV[1])
local removed_live = redis.call('lrem', KEYS[2], 0, ARGV[1])
redis.call('hdel', KEYS[3], ARGV[1])
redis.call('set', KEYS[4], '1')
if removed_scheduled > 0 or removed_live > 0 then
    return 1
end
return 0
"#;

/// Decrements the executor's live-task counter; when it reaches zero,
/// flips status to terminated and publishes on the termination channel.
/// `KEYS[1]` = task-counter key, `KEYS[2]` = status key, `KEYS[3]` =
/// termination channel.
pub const SCHEDULER_QUEUE_COMPLETE: &str = r#"
local remaining = redis.call('decr', KEYS[1])
if remaining < 0 then
    redis.call('set', KEYS[1], 0)
    remaining = 0
end
if remaining == 0 and redis.call('get', KEYS[2]) == 'shutdown' then
    redis.call('set', KEYS[2], 'terminated')
    redis.call('publish', KEYS[3], 'terminated')
end
return remaining
"#;
