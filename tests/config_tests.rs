use apigate::config::Config;
use apigate::error::AppError;

fn parse(yaml: &str) -> Result<Config, AppError> {
    let config: Config = serde_yaml::from_str(yaml)
        .map_err(|e| AppError::Config(format!("Configuration file parsing error: {}", e)))?;
    config.validate()?;
    Ok(config)
}

/// 完整配置解析：端点、重试、后端与中间件
#[test]
fn test_parse_full_config() {
    let config = parse(
        r#"
server:
  address: "127.0.0.1"
  port: 8080
admin:
  address: "127.0.0.1"
  port: 9000
gateway:
  name: "edge"
  middlewares:
    - name: logging
  endpoints:
    - path: /api/users
      method: GET
      protocol: HTTP
      service: users
      basePath: /api
      retry:
        attempts: 3
        perTryTimeout: 2000
        timeout: 5000
        conditions:
          - byStatusCode: "500-504"
          - byHeader:
              name: x-should-retry
      backends:
        - url: http://10.0.0.1:8000
          weight: 2
        - url: http://10.0.0.2:8000
      balance: weightedRoundRobin
    - path: /stream/events
      method: GET
      stream: true
      backends:
        - url: http://10.0.0.3:8000
"#,
    )
    .unwrap();

    assert_eq!(config.gateway.name, "edge");
    assert_eq!(config.gateway.endpoints.len(), 2);

    let users = &config.gateway.endpoints[0];
    assert_eq!(users.service, "users");
    assert_eq!(users.base_path, "/api");
    let retry = users.retry.as_ref().unwrap();
    assert_eq!(retry.attempts, 3);
    assert_eq!(retry.conditions.len(), 2);
    assert_eq!(users.backends[0].weight, 2);
    assert_eq!(users.backends[1].weight, 1);

    assert!(config.gateway.endpoints[1].stream);
}

/// 缺省值：监听地址、权重、协议
#[test]
fn test_defaults() {
    let config = parse(
        r#"
gateway:
  endpoints:
    - path: /api
      method: get
      backends:
        - url: http://10.0.0.1:8000
"#,
    )
    .unwrap();

    assert_eq!(config.server.address, "0.0.0.0");
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.admin.port, 9000);

    let endpoint = &config.gateway.endpoints[0];
    assert!(!endpoint.stream);
    assert!(endpoint.retry.is_none());
    assert_eq!(endpoint.backends[0].weight, 1);
}

/// 流式端点不允许携带重试策略
#[test]
fn test_stream_endpoint_rejects_retry() {
    let result = parse(
        r#"
gateway:
  endpoints:
    - path: /stream
      method: GET
      stream: true
      retry:
        attempts: 3
      backends:
        - url: http://10.0.0.1:8000
"#,
    );

    match result {
        Err(AppError::Config(message)) => {
            assert!(message.contains("cannot carry a retry policy"), "{}", message);
        }
        other => panic!("expected Config error, got {:?}", other.map(|_| ())),
    }
}

/// 重复的匹配键在验证期拒绝
#[test]
fn test_duplicate_endpoints_rejected() {
    let result = parse(
        r#"
gateway:
  endpoints:
    - path: /dup
      method: GET
      backends:
        - url: http://10.0.0.1:8000
    - path: /dup
      method: GET
      backends:
        - url: http://10.0.0.2:8000
"#,
    );
    assert!(matches!(result, Err(AppError::Config(_))));
}

/// 非法的重试条件与方法
#[test]
fn test_invalid_values_rejected() {
    // 非法状态码区间
    let result = parse(
        r#"
gateway:
  endpoints:
    - path: /bad
      method: GET
      retry:
        attempts: 2
        conditions:
          - byStatusCode: "504-500"
      backends:
        - url: http://10.0.0.1:8000
"#,
    );
    assert!(matches!(result, Err(AppError::Config(_))));

    // 路径必须以斜杠开头
    let result = parse(
        r#"
gateway:
  endpoints:
    - path: no-slash
      method: GET
      backends:
        - url: http://10.0.0.1:8000
"#,
    );
    assert!(matches!(result, Err(AppError::Config(_))));
}
