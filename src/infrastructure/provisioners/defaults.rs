// Copyright 2025 The score-k8s Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The default provisioner set written to `zz-default.provisioners.yaml`
//! on `init`. The file name is prefixed so user-supplied provisioner files
//! sort ahead of it and take precedence.

pub const DEFAULT_PROVISIONERS_FILE_NAME: &str = "zz-default.provisioners.yaml";

pub const DEFAULT_PROVISIONERS: &str = r#"# The default provisioners available in every score-k8s project. Copy an
# entry into an earlier-sorting *.provisioners.yaml file to override it.
- uri: template://default-provisioners/example-provisioner-resource
  type: example-provisioner-resource
  description: A dummy resource demonstrating the template provisioner.
  expected_outputs:
  - plaintext
  outputs: |
    plaintext: an example string

- uri: template://default-provisioners/volume
  type: volume
  description: Provisions an ephemeral emptyDir volume bound to the pod lifetime.
  expected_outputs:
  - source
  outputs: |
    source:
      emptyDir: {}

- uri: template://default-provisioners/dns
  type: dns
  description: Provisions a stable localhost hostname for local development.
  expected_outputs:
  - host
  state: |
    subdomain: {{ State.subdomain | default("dns" ~ (randAlphaNum(8) | lower)) }}
  shared: |
    dns_table:
      {{ SourceWorkload }}: {{ State.subdomain }}.localhost
  outputs: |
    host: {{ State.subdomain }}.localhost

- uri: template://default-provisioners/route
  type: route
  description: Routes a path of a dns hostname to a named service port via Ingress.
  supported_params:
  - host
  - path
  - port
  init: |
    {% if not Params.host %}{{ fail("params: host is required") }}{% endif %}
    {% if not Params.path %}{{ fail("params: path is required") }}{% endif %}
    {% if not Params.port %}{{ fail("params: port is required") }}{% endif %}
    {% set svc = WorkloadServices[SourceWorkload] %}
    {% set port = svc.ports[Params.port | string] %}
    {% if not port %}{{ fail("params: port '" ~ Params.port ~ "' is not a declared service port of workload '" ~ SourceWorkload ~ "'") }}{% endif %}
    serviceName: {{ svc.service_name }}
    servicePort: {{ port.port }}
  manifests: |
    - apiVersion: networking.k8s.io/v1
      kind: Ingress
      metadata:
        name: route-{{ Guid }}
        annotations:
          k8s.score.dev/resource-uid: "{{ Uid }}"
      spec:
        rules:
        - host: {{ Params.host }}
          http:
            paths:
            - path: {{ Params.path }}
              pathType: Prefix
              backend:
                service:
                  name: {{ Init.serviceName }}
                  port:
                    number: {{ Init.servicePort }}

- uri: template://default-provisioners/postgres
  type: postgres
  description: Provisions a single-replica PostgreSQL instance with a dedicated database.
  expected_outputs:
  - host
  - port
  - name
  - database
  - username
  - password
  init: |
    service: pg-{{ Guid }}
  state: |
    database: {{ State.database | default("db-" ~ (randAlphaNum(8) | lower)) }}
    username: {{ State.username | default("user-" ~ (randAlphaNum(8) | lower)) }}
    password: {{ State.password | default(randAlphaNum(16)) }}
  outputs: |
    host: {{ Init.service }}
    port: 5432
    name: {{ State.database }}
    database: {{ State.database }}
    username: {{ State.username }}
    password: {{ encodeSecretRef(Init.service, "password") }}
  manifests: |
    - apiVersion: v1
      kind: Secret
      metadata:
        name: {{ Init.service }}
      stringData:
        password: {{ State.password }}
    - apiVersion: v1
      kind: Service
      metadata:
        name: {{ Init.service }}
      spec:
        selector:
          app: {{ Init.service }}
        ports:
        - port: 5432
          targetPort: 5432
    - apiVersion: apps/v1
      kind: StatefulSet
      metadata:
        name: {{ Init.service }}
      spec:
        replicas: 1
        serviceName: {{ Init.service }}
        selector:
          matchLabels:
            app: {{ Init.service }}
        template:
          metadata:
            labels:
              app: {{ Init.service }}
          spec:
            containers:
            - name: postgres
              image: postgres:16-alpine
              env:
              - name: POSTGRES_DB
                value: {{ State.database }}
              - name: POSTGRES_USER
                value: {{ State.username }}
              - name: POSTGRES_PASSWORD
                valueFrom:
                  secretKeyRef:
                    name: {{ Init.service }}
                    key: password
              ports:
              - containerPort: 5432

- uri: template://default-provisioners/redis
  type: redis
  description: Provisions a single-replica password-protected Redis instance.
  expected_outputs:
  - host
  - port
  - username
  - password
  init: |
    service: redis-{{ Guid }}
  state: |
    password: {{ State.password | default(randAlphaNum(16)) }}
  outputs: |
    host: {{ Init.service }}
    port: 6379
    username: default
    password: {{ encodeSecretRef(Init.service, "password") }}
  manifests: |
    - apiVersion: v1
      kind: Secret
      metadata:
        name: {{ Init.service }}
      stringData:
        password: {{ State.password }}
        redis.conf: |
          requirepass {{ State.password }}
    - apiVersion: v1
      kind: Service
      metadata:
        name: {{ Init.service }}
      spec:
        selector:
          app: {{ Init.service }}
        ports:
        - port: 6379
          targetPort: 6379
    - apiVersion: apps/v1
      kind: StatefulSet
      metadata:
        name: {{ Init.service }}
      spec:
        replicas: 1
        serviceName: {{ Init.service }}
        selector:
          matchLabels:
            app: {{ Init.service }}
        template:
          metadata:
            labels:
              app: {{ Init.service }}
          spec:
            containers:
            - name: redis
              image: redis:7-alpine
              command:
              - redis-server
              - /etc/redis/redis.conf
              volumeMounts:
              - name: config
                mountPath: /etc/redis
              ports:
              - containerPort: 6379
            volumes:
            - name: config
              secret:
                secretName: {{ Init.service }}
                items:
                - key: redis.conf
                  path: redis.conf

- uri: template://default-provisioners/service-port
  type: service-port
  description: Resolves the hostname and port of another workload's named service port.
  supported_params:
  - workload
  - port
  expected_outputs:
  - hostname
  - port
  init: |
    {% if not Params.workload %}{{ fail("params: workload is required") }}{% endif %}
    {% if not Params.port %}{{ fail("params: port is required") }}{% endif %}
    {% set svc = WorkloadServices[Params.workload] %}
    {% if not svc %}{{ fail("params: workload '" ~ Params.workload ~ "' is not a known workload") }}{% endif %}
    {% set port = svc.ports[Params.port | string] %}
    {% if not port %}{{ fail("params: port '" ~ Params.port ~ "' is not a declared service port of workload '" ~ Params.workload ~ "'") }}{% endif %}
    hostname: {{ svc.service_name }}
    port: {{ port.port }}
  outputs: |
    hostname: {{ Init.hostname }}
    port: {{ Init.port }}
"#;
